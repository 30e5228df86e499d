mod cli;
mod commands;
mod config;
mod dump;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::*;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "heapscope=debug"
    } else {
        "heapscope=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Heaps {
            dump,
            maps,
            allocator,
        } => {
            commands::heaps::handle(&dump, maps.as_deref(), allocator.as_deref())?;
        }

        Commands::Walk {
            dump,
            maps,
            start,
            free,
            limit,
            allocator,
        } => {
            commands::walk::handle(
                &dump,
                maps.as_deref(),
                start.as_deref(),
                free,
                limit,
                allocator.as_deref(),
            )?;
        }

        Commands::Pointers {
            dump,
            maps,
            refresh,
        } => {
            commands::pointers::handle(&dump, maps.as_deref(), refresh)?;
        }

        Commands::Configure {
            cache_dir,
            allocator,
            validation_depth,
            word_size,
            constraints,
            show,
        } => {
            let settings = commands::configure::Settings {
                cache_dir,
                allocator,
                validation_depth,
                word_size,
                constraints,
            };
            commands::configure::handle(settings, show)?;
        }
    }

    Ok(())
}
