//! `lvlab capabilities` command.

use clap::Args;
use lvlab_runtime::Hypervisor;

use super::Lab;

#[derive(Args)]
pub struct CapabilitiesArgs;

pub async fn execute(_args: CapabilitiesArgs, lab: &Lab) -> Result<(), Box<dyn std::error::Error>> {
    let session = lab.connect().await?;
    println!("{}", session.capabilities().await?);
    Ok(())
}
