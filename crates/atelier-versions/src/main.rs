#![warn(missing_docs)]

//! Atelier command-line client

use anyhow::Result;
use atelier_versions::cli::Cli;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    cli.run()
}
