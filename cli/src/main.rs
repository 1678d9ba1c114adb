// Good defaults
#![forbid(unused_must_use)]
#![deny(unsafe_code)]

use clap::Parser;
use gator_lib::{Cli, Config, Registry};

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error loading configuration: {e:#}");
            std::process::exit(1);
        }
    };

    let registry = Registry::builtin();
    let code = gator_lib::orchestrator::run(cli, config, &registry);
    std::process::exit(code);
}
