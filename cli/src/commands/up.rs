//! `lvlab up` command: create or power on a machine.

use clap::Args;
use lvlab_runtime::UpOutcome;

use super::Lab;

#[derive(Args)]
pub struct UpArgs {
    /// Machine name (vm_name or hostname)
    pub vm: String,
}

pub async fn execute(args: UpArgs, lab: &Lab) -> Result<(), Box<dyn std::error::Error>> {
    let machine = lab.machine(&args.vm)?;
    let session = lab.connect().await?;
    let controller = lab.controller(&session)?;

    match controller.up(&machine).await? {
        UpOutcome::AlreadyRunning => println!("{} is already running", machine.vm_name),
        UpOutcome::Started(status) => println!("{} started: {status}", machine.vm_name),
        UpOutcome::Transitional(status) => {
            println!("{} is {status}; not starting it", machine.vm_name)
        }
        UpOutcome::Deployed => println!("{} deployed", machine.vm_name),
    }
    Ok(())
}
