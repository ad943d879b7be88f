// Facility/severity logging for igmpd
//
// A small syslog-flavored logging layer: every message carries a
// severity (RFC 5424 levels) and a facility naming the component it
// came from. Handles are cheap clones sharing one sink and one
// runtime-adjustable threshold.

mod facility;
mod logger;
#[macro_use]
mod macros;
mod severity;

// Public exports
pub use facility::Facility;
pub use logger::{LogEntry, LogSink, Logger, NullSink, StderrSink};
pub use severity::Severity;
