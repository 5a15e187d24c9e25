use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    let parsed = cli::Cli::parse();

    match parsed.dispatch().await {
        Ok(()) => Ok(()),
        Err(err) => {
            // The agent command's own exit status is passed through unchanged
            if let Some(exit) = err.downcast_ref::<commands::run::CommandExitCode>() {
                std::process::exit(exit.0);
            }
            Err(err)
        }
    }
}
