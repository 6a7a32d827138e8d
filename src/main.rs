use anyhow::Context;
use clap::Parser;

use revmark::cli::Cli;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init()
        .context("failed to initialize logger")?;

    let cli = Cli::parse();
    std::process::exit(cli.run());
}
