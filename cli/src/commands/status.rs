//! `lvlab status` command.

use clap::Args;

use super::Lab;
use crate::output;

#[derive(Args)]
pub struct StatusArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: StatusArgs, lab: &Lab) -> Result<(), Box<dyn std::error::Error>> {
    let machines = lab.machines()?;
    let session = lab.connect().await?;
    let statuses = lab.controller(&session)?.status(&machines).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        println!("{}", output::status_table(&statuses));
    }
    Ok(())
}
