//! `kecontact discover` — broadcast a probe, list who answered.

use kecontact_core::ConnectionManager;

use crate::cli::{DiscoverArgs, GlobalOpts};
use crate::error::CliError;

pub async fn handle(args: &DiscoverArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let manager = ConnectionManager::connect(global.connection_config()).await?;

    let hosts = manager.discover(args.broadcast).await?;
    if hosts.is_empty() {
        println!("No charging station answered on {}", args.broadcast);
    }
    for host in hosts {
        println!("{host}");
    }

    manager.shutdown().await;
    Ok(())
}
