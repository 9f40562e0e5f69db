// ── Response classification ──
//
// Inbound payloads are loosely typed: the same socket receives discovery
// probes we broadcast ourselves, firmware announce strings, bare OK/error
// tokens and JSON report blocks. The check order below is significant
// because the patterns overlap — a rejected command never contains valid
// structured data, so the token checks run before any decode attempt.

use crate::report;

/// Marker prefix of a discovery announce reply.
const ANNOUNCE_PREFIX: &str = "\"Firmware";

/// Token a station sends when it accepted the last command.
pub const ACK_TOKEN: &str = "TCH-OK :done";

/// Token a station sends when it rejected the last command.
pub const ERR_TOKEN: &str = "TCH-ERR";

/// The numbered report families a station can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    /// Report 1: serial, firmware and product identification.
    Identification,
    /// Report 2: primary charging state and current limits.
    Status,
    /// Report 3: metering values (voltages, currents, energy).
    Metering,
    /// Reports 100+: charging-session history entries.
    History,
}

impl ReportKind {
    /// Fixed id → kind table. Ids outside it are unclassifiable.
    pub fn from_id(id: u64) -> Option<Self> {
        match id {
            1 => Some(Self::Identification),
            2 => Some(Self::Status),
            3 => Some(Self::Metering),
            100.. => Some(Self::History),
            _ => None,
        }
    }
}

/// What an inbound datagram turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    /// Echo of the discovery probe itself (`"i"`). Dropped on receive.
    Probe,
    /// Discovery announce (`"Firmware…`) answering a probe.
    Announce,
    /// The station accepted the last command.
    Acknowledged,
    /// The station rejected the last command.
    Rejected,
    /// A numbered report payload.
    Report(ReportKind),
    /// Valid key/value payload without an ID — an unsolicited partial
    /// state update the station broadcasts on changes.
    PushUpdate,
    /// Could not be classified. Logged and dropped by the engine.
    Unknown,
}

/// Classify a decoded payload. Never fails: a payload that fits no
/// pattern is [`ResponseKind::Unknown`].
pub fn classify(payload: &str) -> ResponseKind {
    if payload.starts_with('i') {
        return ResponseKind::Probe;
    }
    if payload.starts_with(ANNOUNCE_PREFIX) {
        return ResponseKind::Announce;
    }
    if payload.contains(ACK_TOKEN) {
        return ResponseKind::Acknowledged;
    }
    if payload.contains(ERR_TOKEN) {
        return ResponseKind::Rejected;
    }

    let Ok(fields) = report::decode(payload) else {
        return ResponseKind::Unknown;
    };
    match report::report_id(&fields) {
        Some(id) => ReportKind::from_id(id).map_or(ResponseKind::Unknown, ResponseKind::Report),
        None => ResponseKind::PushUpdate,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn probe_and_announce() {
        assert_eq!(classify("i"), ResponseKind::Probe);
        assert_eq!(
            classify("\"Firmware\":\"P30 v 3.10.57\"\n"),
            ResponseKind::Announce
        );
    }

    #[test]
    fn command_tokens() {
        assert_eq!(classify("TCH-OK :done\n"), ResponseKind::Acknowledged);
        assert_eq!(classify("TCH-ERR 255\n"), ResponseKind::Rejected);
    }

    #[test]
    fn report_ids_map_to_kinds() {
        assert_eq!(
            classify(r#"{"ID": "1", "Serial": "123"}"#),
            ResponseKind::Report(ReportKind::Identification)
        );
        assert_eq!(
            classify(r#"{"ID": "2", "State": 3}"#),
            ResponseKind::Report(ReportKind::Status)
        );
        assert_eq!(
            classify(r#"{"ID": 3, "U1": 230}"#),
            ResponseKind::Report(ReportKind::Metering)
        );
        assert_eq!(
            classify(r#"{"ID": "103", "Session ID": 42}"#),
            ResponseKind::Report(ReportKind::History)
        );
    }

    #[test]
    fn json_without_id_is_a_push_update() {
        assert_eq!(classify(r#"{"State": 2}"#), ResponseKind::PushUpdate);
    }

    #[test]
    fn garbage_is_unknown() {
        assert_eq!(classify("{not json"), ResponseKind::Unknown);
        assert_eq!(classify("hello"), ResponseKind::Unknown);
        // Unmapped report id (4..=99 is unused by the firmware).
        assert_eq!(classify(r#"{"ID": "7"}"#), ResponseKind::Unknown);
    }
}
