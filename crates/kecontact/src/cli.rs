//! Clap derive structures for the `kecontact` CLI.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use kecontact_core::ConnectionConfig;
use kecontact_proto::UDP_PORT;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// kecontact -- discover, drive and emulate KEBA KeContact charging stations
#[derive(Debug, Parser)]
#[command(
    name = "kecontact",
    version,
    about = "Talk to KEBA KeContact charging stations over UDP",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Local address to bind the UDP socket to
    #[arg(long, env = "KECONTACT_BIND", default_value = "0.0.0.0:7090", global = true)]
    pub bind: SocketAddr,

    /// Port the charging stations listen on
    #[arg(long, env = "KECONTACT_PORT", default_value_t = UDP_PORT, global = true)]
    pub port: u16,

    /// Reply timeout in seconds for setup and discovery
    #[arg(long, env = "KECONTACT_TIMEOUT", default_value_t = 3, global = true)]
    pub timeout: u64,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl GlobalOpts {
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            bind: self.bind,
            device_port: self.port,
            setup_timeout: Duration::from_secs(self.timeout),
        }
    }
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Broadcast a discovery probe and list answering stations
    #[command(alias = "dis")]
    Discover(DiscoverArgs),

    /// Connect to a station and drive it from an interactive prompt
    #[command(alias = "c")]
    Connect(ConnectArgs),

    /// Run a charging station emulator
    #[command(alias = "emu")]
    Emulate(EmulateArgs),
}

#[derive(Debug, Args)]
pub struct DiscoverArgs {
    /// Broadcast address to probe
    #[arg(default_value = "255.255.255.255")]
    pub broadcast: IpAddr,
}

#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// IP address of the charging station
    pub host: String,

    /// Keep the periodic polling loop running while connected
    #[arg(long)]
    pub poll: bool,
}

#[derive(Debug, Args)]
pub struct EmulateArgs {
    /// Address the emulator answers on
    #[arg(long, default_value = "0.0.0.0:7090")]
    pub bind: SocketAddr,
}
