//! cardcache - run the bj-trainer offline cache proxy from the command line.
//!
//! Installs the app shell from the configured origin into a disk-backed cache,
//! then serves requests cache-first, so the trainer's assets and card images
//! stay available without a network.

mod app;
mod config;
mod state;

use std::io::{self, Write};
use std::path::Path;

use anyhow::{bail, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;
use config::Config;

/// Directory under the cache dir for log files
const LOG_DIR: &str = "logs";

/// Log file name prefix (rotated daily)
const LOG_FILE: &str = "cardcache.log";

const USAGE: &str = "\
Usage: cardcache [--offline] <command>

Commands:
  install       Cache the app shell and activate the configured version
  get <path>    Request a resource (or a card code like QD) and write it to stdout
  warm-cards    Request every card image so it is cached
  status        List cache namespaces and their entries
  purge         Delete caches of other versions
  reset         Delete all caches and forget the install
  config        Write the current configuration to the config file

Options:
  --offline     Use no network; only cached resources are served";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Install,
    Get(String),
    WarmCards,
    Status,
    Purge,
    Reset,
    Config,
    Help,
}

/// Parse arguments (without the program name) into a command and the
/// offline flag.
fn parse_args(args: &[String]) -> Result<(Command, bool)> {
    let offline = args.iter().any(|a| a == "--offline");
    let rest: Vec<&str> = args
        .iter()
        .map(String::as_str)
        .filter(|a| *a != "--offline")
        .collect();

    let command = match rest.as_slice() {
        [] | ["help"] | ["--help"] | ["-h"] => Command::Help,
        ["install"] => Command::Install,
        ["get", path] => Command::Get(path.to_string()),
        ["get"] => bail!("get needs a path, e.g. `cardcache get ./index.html`"),
        ["warm-cards"] => Command::WarmCards,
        ["status"] => Command::Status,
        ["purge"] => Command::Purge,
        ["reset"] => Command::Reset,
        ["config"] => Command::Config,
        other => bail!("Unknown arguments: {}\n\n{}", other.join(" "), USAGE),
    };
    Ok((command, offline))
}

/// Initialize the tracing subscriber for logging.
/// The returned guard must live until exit so buffered file logs are flushed.
fn init_tracing(config: &Config, cache_dir: &Path) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = if config.log_to_file {
        let appender = tracing_appender::rolling::daily(cache_dir.join(LOG_DIR), LOG_FILE);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, offline) = parse_args(&args)?;
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load()?;
    let cache_dir = config.cache_dir()?;
    let _log_guard = init_tracing(&config, &cache_dir);
    info!(origin = %config.origin, version = %config.cache_name, offline, "cardcache starting");

    if command == Command::Config {
        let path = config.save()?;
        eprintln!("Configuration written to {}", path.display());
        return Ok(());
    }

    let mut app = App::new(config, cache_dir, offline)?;

    match command {
        Command::Install => {
            let state = app.install().await?;
            eprintln!("Installed, worker is {}", state);
        }
        Command::Get(path) => {
            app.restore().await?;
            match app.get(&path).await? {
                Some(response) => {
                    eprintln!("{} ({} bytes)", response.status(), response.content_length());
                    let body = response.into_body();
                    let mut stdout = io::stdout().lock();
                    stdout.write_all(&body)?;
                    stdout.flush()?;
                }
                None => bail!("No response for {} (not cached and network unavailable)", path),
            }
        }
        Command::WarmCards => {
            if !app.restore().await? {
                bail!("Nothing installed, run `cardcache install` first");
            }
            let summary = app.warm_cards().await?;
            eprintln!("{} cards cached", summary.cached);
            if !summary.missing.is_empty() {
                eprintln!("Unavailable: {}", summary.missing.join(" "));
            }
        }
        Command::Status => {
            let listing = app.status().await?;
            if listing.is_empty() {
                println!("No caches");
            }
            for namespace in listing {
                let marker = if namespace.current { " (current)" } else { "" };
                println!("{}{}: {} entries", namespace.name, marker, namespace.entries.len());
                for entry in namespace.entries {
                    println!("  {} {} {}B {}", entry.status, entry.url, entry.size, entry.age);
                }
            }
        }
        Command::Purge => {
            let purged = app.purge().await?;
            if purged.is_empty() {
                eprintln!("Nothing to purge");
            } else {
                eprintln!("Deleted {}", purged.join(", "));
            }
        }
        Command::Reset => {
            let deleted = app.reset().await?;
            eprintln!("Deleted {} caches", deleted);
        }
        Command::Config | Command::Help => {}
    }

    info!("cardcache finished");
    Ok(())
}
