//! `lvlab destroy` command: remove a machine and its local artifacts.

use std::io::{BufRead, Write};

use clap::Args;
use lvlab_runtime::DestroyOutcome;

use super::Lab;

#[derive(Args)]
pub struct DestroyArgs {
    /// Machine name (vm_name or hostname)
    pub vm: String,

    /// Do not ask for confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

pub async fn execute(args: DestroyArgs, lab: &Lab) -> Result<(), Box<dyn std::error::Error>> {
    let machine = lab.machine(&args.vm)?;

    if !args.yes && !confirm(&format!("Destroy {} and delete its disks?", machine.vm_name))? {
        println!("Aborted");
        return Ok(());
    }

    let session = lab.connect().await?;
    let controller = lab.controller(&session)?;

    match controller.destroy(&machine).await? {
        DestroyOutcome::NotDeployed => println!("{} is not deployed", machine.vm_name),
        DestroyOutcome::Destroyed {
            snapshots_deleted,
            work_dir_removed,
        } => {
            println!(
                "{} destroyed ({snapshots_deleted} snapshot(s) deleted)",
                machine.vm_name
            );
            if !work_dir_removed {
                println!(
                    "Left {} in place: it still contains files",
                    machine.work_dir.display()
                );
            }
        }
    }
    Ok(())
}

/// Ask a yes/no question on stdin. Anything but `y`/`yes` is a no.
fn confirm(question: &str) -> std::io::Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
