use anyhow::Result;
use clap::Parser;
use lentil::cli::{regression, Cli, Commands};

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Regression(args) => {
            regression::run(args)?;
        }
    }

    Ok(())
}
