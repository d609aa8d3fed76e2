//! RareCite CLI: evidence-gated patient-facing articles about rare diseases.
//!
//! Retrieves sources for every article section, decides whether the evidence
//! is strong enough, and writes a cited Markdown article when it is.

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
