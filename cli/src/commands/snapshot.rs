//! `lvlab snapshot` commands.

use clap::{Args, Subcommand};

use super::Lab;

#[derive(Args)]
pub struct SnapshotArgs {
    #[command(subcommand)]
    pub command: SnapshotCommand,
}

#[derive(Subcommand)]
pub enum SnapshotCommand {
    /// Snapshot a deployed machine
    Create {
        /// Machine name (vm_name or hostname)
        vm: String,
        /// Snapshot name
        name: String,
        /// Snapshot description
        #[arg(short = 'd', long)]
        description: Option<String>,
    },
    /// List a machine's snapshots
    List {
        /// Machine name (vm_name or hostname)
        vm: String,
    },
    /// Delete a snapshot
    Delete {
        /// Machine name (vm_name or hostname)
        vm: String,
        /// Snapshot name
        name: String,
    },
}

pub async fn execute(args: SnapshotArgs, lab: &Lab) -> Result<(), Box<dyn std::error::Error>> {
    let vm = match &args.command {
        SnapshotCommand::Create { vm, .. }
        | SnapshotCommand::List { vm }
        | SnapshotCommand::Delete { vm, .. } => vm,
    };
    let machine = lab.machine(vm)?;
    let session = lab.connect().await?;
    let controller = lab.controller(&session)?;

    match &args.command {
        SnapshotCommand::Create {
            name, description, ..
        } => {
            controller
                .snapshot_create(&machine, name, description.as_deref())
                .await?;
            println!("Created snapshot {name} of {}", machine.vm_name);
        }
        SnapshotCommand::List { .. } => {
            for snapshot in controller.snapshot_list(&machine).await? {
                println!("{snapshot}");
            }
        }
        SnapshotCommand::Delete { name, .. } => {
            controller.snapshot_delete(&machine, name).await?;
            println!("Deleted snapshot {name} of {}", machine.vm_name);
        }
    }
    Ok(())
}
