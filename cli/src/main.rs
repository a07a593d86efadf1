use clap::Parser;

use ddal_cli::logging::init_logging;
use ddal_cli::{execute, load_config, render, Cli};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging, cli.verbose)?;

    let report = execute(&cli, &config)?;
    print!("{}", render(&report, cli.format)?);

    Ok(())
}
