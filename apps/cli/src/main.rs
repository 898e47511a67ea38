//! spacebook CLI — export and follow hosted documentation spaces.
//!
//! Opens a space over its realtime session, prints its table of contents or
//! its full content as JSON, and can keep following published revisions.

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
