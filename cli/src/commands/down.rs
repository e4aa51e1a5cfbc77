//! `lvlab down` command: graceful shutdown.

use clap::Args;
use lvlab_runtime::DownOutcome;

use super::Lab;

#[derive(Args)]
pub struct DownArgs {
    /// Machine name (vm_name or hostname)
    pub vm: String,
}

pub async fn execute(args: DownArgs, lab: &Lab) -> Result<(), Box<dyn std::error::Error>> {
    let machine = lab.machine(&args.vm)?;
    let session = lab.connect().await?;
    let controller = lab.controller(&session)?;

    match controller.down(&machine).await? {
        DownOutcome::ShutdownRequested => println!("Shutdown requested for {}", machine.vm_name),
        DownOutcome::NotRunning(status) => {
            println!("{} is {status}; nothing to shut down", machine.vm_name)
        }
        DownOutcome::NotDeployed => println!("{} is not deployed", machine.vm_name),
    }
    Ok(())
}
