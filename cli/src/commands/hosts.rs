//! `lvlab hosts` command: print an /etc/hosts block for the environment.

use clap::Args;
use lvlab_core::hosts::{hosts_entries, render_hosts};

use super::Lab;

#[derive(Args)]
pub struct HostsArgs;

pub async fn execute(_args: HostsArgs, lab: &Lab) -> Result<(), Box<dyn std::error::Error>> {
    let entries = hosts_entries(&lab.machines()?);
    print!("{}", render_hosts(&lab.env.name, &entries));
    Ok(())
}
