//! fansh CLI entry point.
//!
//! Usage:
//!   fansh                        # connect to every configured server
//!   fansh -H web01 -H web02      # connect to the named servers only
//!   fansh -F ./fansh.toml        # explicit config file
//!   fansh --list                 # print configured server names

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fansh_kernel::config::expand_home;
use fansh_kernel::{CommandFactory, Config};
use fansh_types::SessionFactory;

/// Default config file location.
const DEFAULT_CONFIG: &str = "~/.fansh.toml";

#[derive(Parser)]
#[command(name = "fansh", version, about = "Parallel interactive remote shell")]
struct Cli {
    /// Connect directly to this server (repeatable), skipping selection
    #[arg(short = 'H', long = "host", value_name = "NAME")]
    host: Vec<String>,

    /// Config file path
    #[arg(short = 'F', long = "file", value_name = "PATH")]
    file: Option<PathBuf>,

    /// Print configured server names and exit
    #[arg(short = 'l', long = "list")]
    list: bool,
}

fn main() -> ExitCode {
    // Respects RUST_LOG.
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let path = cli.file.unwrap_or_else(|| expand_home(DEFAULT_CONFIG));
    let config = if path.exists() {
        Config::load(&path)?
    } else {
        Config::default()
    };

    if cli.list {
        for name in config.server_names() {
            println!("{name}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let selected = if cli.host.is_empty() {
        config.server_names()
    } else {
        cli.host
    };

    let mut endpoints: Vec<(String, Arc<dyn SessionFactory>)> = Vec::new();
    for name in &selected {
        match config.server.get(name) {
            Some(server) => {
                let factory: Arc<dyn SessionFactory> =
                    Arc::new(CommandFactory::from_server(server));
                endpoints.push((name.clone(), factory));
            }
            None => {
                eprintln!("Error: invalid server list: unknown server {name}");
                return Ok(ExitCode::from(1));
            }
        }
    }
    if endpoints.is_empty() {
        eprintln!("Error: No valid connections");
        return Ok(ExitCode::from(1));
    }

    let code = fansh_repl::run(config.shell, endpoints)?;
    Ok(ExitCode::from(code as u8))
}
