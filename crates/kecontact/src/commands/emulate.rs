//! `kecontact emulate` — answer like a P30 until interrupted.

use kecontact_core::emulator::Emulator;

use crate::cli::EmulateArgs;
use crate::error::CliError;

pub async fn handle(args: &EmulateArgs) -> Result<(), CliError> {
    let emulator = Emulator::start(args.bind).await?;
    println!("Emulator answering on {} (Ctrl-C to stop)", emulator.local_addr());

    tokio::signal::ctrl_c().await?;
    emulator.shutdown();
    println!();
    Ok(())
}
