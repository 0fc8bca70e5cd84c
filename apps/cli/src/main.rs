//! threadcrawl CLI: crawl Slack channels into a local, searchable index.
//!
//! Every message is resolved in its thread context, and the pages and
//! images it links to are indexed alongside it.

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
