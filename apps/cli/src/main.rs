//! promptbatch CLI: run prompt batches across Ollama backends.
//!
//! Loads prompt files, enriches linked prompts with fetched references, and
//! writes one artifact per prompt.

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
