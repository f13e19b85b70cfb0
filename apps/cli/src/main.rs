//! Feedloom CLI — scheduled feed transformation service.
//!
//! Subscribes RSS/Atom sources, ingests their items, and runs cron-scheduled
//! translate/summarize tasks over content that has not been processed yet.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
