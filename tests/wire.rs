//! Wire-format round-trip and checksum tests.

use std::net::Ipv4Addr;

use igmpd::message::{
    checksum, code_to_value, parse, value_to_code, GroupRecord, Message, MembershipQuery,
    MembershipReport, CHANGE_TO_EXCLUDE, CHANGE_TO_INCLUDE, MAX_CODE_VALUE, MODE_IS_EXCLUDE,
    MODE_IS_INCLUDE,
};

fn addr(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

#[test]
fn query_roundtrip_via_message_parse() {
    let queries = vec![
        MembershipQuery::general(100, 2, 1216),
        MembershipQuery::group_specific(addr("239.1.2.3"), 10, 2, 1216, false),
        MembershipQuery::group_specific(addr("239.1.2.3"), 10, 7, 1216, true),
        {
            let mut query = MembershipQuery::group_specific(addr("232.0.0.1"), 20, 2, 125, false);
            query.source_addresses = vec![addr("10.0.0.1"), addr("192.168.0.1")];
            query
        },
    ];
    for query in queries {
        let bytes = query.to_bytes();
        assert!(checksum::verify(&bytes));
        match parse(&bytes).unwrap() {
            Message::Query(parsed) => assert_eq!(parsed, query),
            other => panic!("expected query, got {:?}", other),
        }
    }
}

#[test]
fn report_roundtrip_via_message_parse() {
    let report = MembershipReport {
        group_records: vec![
            GroupRecord::new(MODE_IS_INCLUDE, addr("239.0.0.1"), vec![]),
            GroupRecord::new(MODE_IS_EXCLUDE, addr("239.0.0.2"), vec![addr("10.0.0.1")]),
            GroupRecord::new(CHANGE_TO_INCLUDE, addr("239.0.0.3"), vec![]),
            GroupRecord::new(
                CHANGE_TO_EXCLUDE,
                addr("239.0.0.4"),
                vec![addr("10.0.0.1"), addr("10.0.0.2"), addr("10.0.0.3")],
            ),
        ],
    };
    let bytes = report.to_bytes();
    assert!(checksum::verify(&bytes));
    match parse(&bytes).unwrap() {
        Message::Report(parsed) => assert_eq!(parsed, report),
        other => panic!("expected report, got {:?}", other),
    }
}

#[test]
fn code_conversion_never_rounds_up() {
    for value in (0..40_000u32).step_by(7) {
        let decoded = code_to_value(value_to_code(value));
        assert!(
            decoded <= value.min(MAX_CODE_VALUE),
            "value {} decoded to larger {}",
            value,
            decoded
        );
    }
}

#[test]
fn code_conversion_exact_below_128() {
    for value in 0..128u32 {
        assert_eq!(code_to_value(value_to_code(value)), value);
    }
}

#[test]
fn update_checksum_is_stable_and_bit_sensitive() {
    // A well-formed report buffer with the checksum zeroed.
    let mut buf = MembershipReport {
        group_records: vec![GroupRecord::new(
            CHANGE_TO_EXCLUDE,
            addr("239.1.1.1"),
            vec![addr("10.0.0.1")],
        )],
    }
    .to_bytes();
    buf[2] = 0;
    buf[3] = 0;

    let first = checksum::update(&mut buf);
    let second = checksum::update(&mut buf);
    assert_eq!(first, second, "update must be idempotent");

    for byte in 0..buf.len() {
        if byte == 2 || byte == 3 {
            continue;
        }
        let mut flipped = buf.clone();
        flipped[byte] ^= 0x10;
        assert_ne!(
            checksum::compute(&flipped),
            first,
            "bit flip in byte {} went undetected",
            byte
        );
    }
}

#[test]
fn truncated_messages_are_rejected() {
    let query = MembershipQuery::general(100, 2, 1216).to_bytes();
    for len in 1..query.len() {
        assert!(parse(&query[..len]).is_err(), "length {} parsed", len);
    }

    let report = MembershipReport {
        group_records: vec![GroupRecord::new(MODE_IS_INCLUDE, addr("239.0.0.1"), vec![])],
    }
    .to_bytes();
    for len in 1..report.len() {
        assert!(parse(&report[..len]).is_err(), "length {} parsed", len);
    }
}
