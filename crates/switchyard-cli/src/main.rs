//! switchyard: one chat contract, many providers.
//!
//! Sends prompts through a retrying, failing-over router.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use std::sync::Arc;
use switchyard_core::{process_env, ConfigStore, Router};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let store = match &cli.config {
        Some(path) => ConfigStore::at(path),
        None => ConfigStore::new(),
    };
    let file = store.load()?;
    let config = cli.router_config(&file, process_env)?;
    let registry = Arc::new(file.registry());
    let router = Router::new(config, registry)?;

    let result = match cli.command {
        Commands::Chat {
            prompt,
            system,
            stream,
            max_tokens,
            json,
        } => {
            let options = commands::chat::ChatOptions {
                prompt,
                system,
                stream,
                max_tokens,
                json,
            };
            commands::chat::run(router, options).await
        }
        Commands::Providers => commands::providers::run(&router, &file),
        Commands::Ping => commands::ping::run(router).await,
    };

    if let Err(err) = result {
        if let Some(exit_err) = err.downcast_ref::<commands::ExitError>() {
            if !exit_err.quiet {
                eprintln!("{}", exit_err.message);
            }
            std::process::exit(exit_err.code);
        }
        return Err(err);
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("switchyard=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
