// kecontact-proto: Stateless wire protocol for KEBA KeContact charging
// stations. Everything in here is a pure function over text — the
// connection engine in kecontact-core owns all sockets and state.

pub mod classify;
pub mod codec;
pub mod command;
pub mod error;
pub mod report;

// ── Primary re-exports ──────────────────────────────────────────────
pub use classify::{ReportKind, ResponseKind, classify};
pub use command::DeviceCommand;
pub use error::ProtoError;

/// UDP port the charging stations listen and answer on.
pub const UDP_PORT: u16 = 7090;

/// Discovery probe payload. Sent to a broadcast address; every station
/// on the segment answers with a firmware announce string.
pub const DISCOVERY_PROBE: &str = "i";
