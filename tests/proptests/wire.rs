//! Property-Based Tests: Wire Codec
//!
//! These tests use the `proptest` framework to throw a wide variety
//! of byte inputs at the message parsers. The goal is robustness
//! against malformed or adversarial input, plus round-trip equality
//! on generated well-formed messages.

#[cfg(test)]
mod tests {
    use igmpd::message::{
        checksum, code_to_value, parse, value_to_code, GroupRecord, MembershipQuery,
        MembershipReport, Message, MAX_CODE_VALUE,
    };
    use proptest::prelude::*;
    use std::net::Ipv4Addr;

    fn arb_ipv4() -> impl Strategy<Value = Ipv4Addr> {
        any::<u32>().prop_map(Ipv4Addr::from)
    }

    /// Interval values that survive the code encoding exactly.
    fn arb_representable_value() -> impl Strategy<Value = u32> {
        any::<u8>().prop_map(code_to_value)
    }

    fn arb_query() -> impl Strategy<Value = MembershipQuery> {
        (
            arb_representable_value(),
            arb_ipv4(),
            any::<bool>(),
            0u8..8,
            arb_representable_value(),
            prop::collection::vec(arb_ipv4(), 0..8),
        )
            .prop_map(
                |(max_resp_time, group_address, suppress, qrv, query_interval, sources)| {
                    MembershipQuery {
                        max_resp_time,
                        group_address,
                        suppress_router_side_processing: suppress,
                        robustness_variable: qrv,
                        query_interval,
                        source_addresses: sources,
                    }
                },
            )
    }

    fn arb_report() -> impl Strategy<Value = MembershipReport> {
        prop::collection::vec(
            (any::<u8>(), arb_ipv4(), prop::collection::vec(arb_ipv4(), 0..6)),
            0..6,
        )
        .prop_map(|records| MembershipReport {
            group_records: records
                .into_iter()
                .map(|(record_type, group, sources)| GroupRecord::new(record_type, group, sources))
                .collect(),
        })
    }

    proptest! {
        /// **Property:** parsing never panics, whatever the bytes.
        #[test]
        fn parse_does_not_panic(input in any::<Vec<u8>>()) {
            let _ = parse(&input);
            let _ = checksum::verify(&input);
        }

        /// **Property:** a serialized query parses back to itself.
        #[test]
        fn query_roundtrip(query in arb_query()) {
            let bytes = query.to_bytes();
            prop_assert!(checksum::verify(&bytes));
            match parse(&bytes) {
                Ok(Message::Query(parsed)) => prop_assert_eq!(parsed, query),
                other => prop_assert!(false, "unexpected parse result {:?}", other),
            }
        }

        /// **Property:** a serialized report parses back to itself.
        #[test]
        fn report_roundtrip(report in arb_report()) {
            let bytes = report.to_bytes();
            prop_assert!(checksum::verify(&bytes));
            match parse(&bytes) {
                Ok(Message::Report(parsed)) => prop_assert_eq!(parsed, report),
                other => prop_assert!(false, "unexpected parse result {:?}", other),
            }
        }

        /// **Property:** encoding an interval value never rounds up,
        /// and representable values are exact.
        #[test]
        fn value_to_code_rounds_down(value in any::<u32>()) {
            let decoded = code_to_value(value_to_code(value));
            prop_assert!(decoded <= value.min(MAX_CODE_VALUE));
        }

        /// **Property:** a corrupted checksum field never verifies.
        #[test]
        fn corrupted_checksum_fails(query in arb_query(), flip in 1u16..u16::MAX) {
            let mut bytes = query.to_bytes();
            let stored = u16::from_be_bytes([bytes[2], bytes[3]]);
            let bad = stored ^ flip;
            bytes[2..4].copy_from_slice(&bad.to_be_bytes());
            prop_assert!(!checksum::verify(&bytes));
        }
    }
}
