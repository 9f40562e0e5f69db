// ── Runtime configuration ──
//
// Built by the CLI (or any other embedder) and handed in — the core
// never reads config files. Defaults match the protocol: both sides of
// the conversation live on UDP port 7090.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use kecontact_proto::UDP_PORT;

/// Configuration for a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Local address the shared socket binds to.
    pub bind: SocketAddr,

    /// Port the stations listen on. Separate from `bind` so tests can
    /// run station emulators on ephemeral loopback ports.
    pub device_port: u16,

    /// How long to wait for an identification reply during setup.
    /// Also the collection window for discovery broadcasts.
    pub setup_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), UDP_PORT),
            device_port: UDP_PORT,
            setup_timeout: Duration::from_secs(3),
        }
    }
}

/// Per-station options passed to
/// [`setup_station`](crate::ConnectionManager::setup_station).
#[derive(Debug, Clone)]
pub struct StationOptions {
    /// Run the background polling loop. Disable for one-shot tools that
    /// request reports explicitly.
    pub periodic_polling: bool,

    /// Steady-state polling interval. Clamped to at least 5 s — the
    /// firmware cannot keep up with more.
    pub refresh_interval: Duration,

    /// Polling interval right after a mutating command. Clamped to at
    /// least 1 s.
    pub fast_polling_interval: Duration,
}

impl Default for StationOptions {
    fn default() -> Self {
        Self {
            periodic_polling: true,
            refresh_interval: Duration::from_secs(5),
            fast_polling_interval: Duration::from_secs(1),
        }
    }
}
