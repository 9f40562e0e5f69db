// ── Charging station emulator ──
//
// Canned-answer stand-in for a real station: binds its own socket and
// answers probes, commands and report requests the way the firmware
// does. Used by the CLI `emulate` command and by the integration tests;
// never part of the production data path.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use kecontact_proto::codec;

use crate::error::CoreError;

/// Identity the emulator reports. The default describes a P30 with
/// meter, RFID authorization and data logger, so every polling path is
/// exercised.
#[derive(Debug, Clone)]
pub struct EmulatorProfile {
    pub serial: String,
    pub product: String,
    pub firmware: String,
}

impl Default for EmulatorProfile {
    fn default() -> Self {
        Self {
            serial: "19584627".into(),
            product: "KC-P30-ES240030-000".into(),
            firmware: "P30 v 3.10.57".into(),
        }
    }
}

/// A running emulator. Shuts down on drop.
pub struct Emulator {
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl Emulator {
    /// Bind and start answering with the default profile.
    pub async fn start(bind: SocketAddr) -> Result<Self, CoreError> {
        Self::with_profile(bind, EmulatorProfile::default()).await
    }

    pub async fn with_profile(
        bind: SocketAddr,
        profile: EmulatorProfile,
    ) -> Result<Self, CoreError> {
        let socket = UdpSocket::bind(bind).await?;
        let local_addr = socket.local_addr()?;
        let cancel = CancellationToken::new();

        tokio::spawn(run(Arc::new(socket), profile, cancel.child_token()));
        debug!(%local_addr, "emulator started");

        Ok(Self { local_addr, cancel })
    }

    /// Address the emulator answers on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(socket: Arc<UdpSocket>, profile: EmulatorProfile, cancel: CancellationToken) {
    let mut buf = vec![0u8; 2048];
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => {
                let (len, remote) = match result {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "emulator receive failed");
                        continue;
                    }
                };
                let request = codec::decode(&buf[..len]);
                if let Some(reply) = answer(&profile, request.trim()) {
                    debug!(%remote, reply = reply.trim_end(), "emulator answering");
                    if let Err(e) = socket.send_to(&codec::encode(&reply), remote).await {
                        warn!(error = %e, "emulator send failed");
                    }
                }
            }
        }
    }
    debug!("emulator stopped");
}

/// The firmware's answer table, reduced to what the driver exercises.
fn answer(profile: &EmulatorProfile, request: &str) -> Option<String> {
    const ACKNOWLEDGED: [&str; 10] = [
        "unlock", "stop", "setenergy", "output", "currtime", "curr", "ena", "failsafe",
        "display", "x2",
    ];

    if request == "i" {
        return Some(format!("\"Firmware\":\"{}\"\n", profile.firmware));
    }

    if ACKNOWLEDGED.iter().any(|cmd| request.contains(cmd)) {
        return Some("TCH-OK :done".into());
    }

    if request.contains("start") {
        let mut parts = request.split(' ').skip(1);
        let tag = parts.next().unwrap_or("");
        let class = parts.next().unwrap_or("");
        return Some(format!("\"RFID tag\": \"{tag}\"\n\"RFID class\": \"{class}\""));
    }

    if let Some(id) = request.strip_prefix("report ") {
        let id: u64 = id.trim().parse().ok()?;
        let serial = &profile.serial;
        return match id {
            1 => Some(format!(
                r#"{{"ID": "1","Product": "{}","Serial": "{serial}","Firmware": "{}","COM-module": 0,"Sec": 4711}}"#,
                profile.product, profile.firmware
            )),
            2 => Some(format!(
                r#"{{"ID": "2","State": 2,"Error1": 0,"Error2": 0,"Plug": 1,"Enable sys": 1,"Enable user": 1,"Max curr": 32000,"Max curr %": 1000,"Curr HW": 32000,"Curr user": 63000,"Curr FS": 63000,"Tmo FS": 0,"Curr timer": 0,"Tmo CT": 0,"Setenergy": 0,"Output": 0,"Input": 0,"Serial": "{serial}","Sec": 4711}}"#
            )),
            3 => Some(format!(
                r#"{{"ID": "3","U1": 230,"U2": 230,"U3": 230,"I1": 9990,"I2": 9990,"I3": 9990,"P": 6890000,"PF": 1000,"E pres": 29532,"E total": 1150000,"Serial": "{serial}","Sec": 4711}}"#
            )),
            100.. => Some(format!(
                r#"{{"ID": "{id}","Session ID": 35,"Curr HW": 20000,"E start": 29532,"E pres": 0,"started[s]": 1698,"ended[s]": 0,"reason": 0,"RFID tag": "e3f76b8d00000000","RFID class": "01010400000000000000","Serial": "{serial}","Sec": 1704}}"#
            )),
            _ => None,
        };
    }

    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn probe_gets_a_firmware_announce() {
        let profile = EmulatorProfile::default();
        let reply = answer(&profile, "i").unwrap();
        assert!(reply.starts_with("\"Firmware"));
    }

    #[test]
    fn mutating_commands_are_acknowledged() {
        let profile = EmulatorProfile::default();
        for request in ["ena 1", "curr 63000", "failsafe 30 6000 1", "unlock"] {
            assert_eq!(answer(&profile, request).unwrap(), "TCH-OK :done");
        }
    }

    #[test]
    fn reports_carry_the_profile_identity() {
        let profile = EmulatorProfile::default();
        let report_1 = answer(&profile, "report 1").unwrap();
        assert!(report_1.contains(r#""Serial": "19584627""#));
        assert!(report_1.contains(r#""Product": "KC-P30-ES240030-000""#));

        let report_102 = answer(&profile, "report 102").unwrap();
        assert!(report_102.contains(r#""ID": "102""#));
    }

    #[test]
    fn unknown_requests_are_ignored() {
        let profile = EmulatorProfile::default();
        assert_eq!(answer(&profile, "report 9"), None);
        assert_eq!(answer(&profile, "gibberish"), None);
    }
}
