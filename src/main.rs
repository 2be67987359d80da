//! CLI entry point for the URI normalizer.

use std::io::{self, IsTerminal, Read};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, error, info};
use uri_normalizer_core::config::{bundled_rules, load_rules_file};
use uri_normalizer_core::{NormalizerConfig, UriNormalizer};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (warn)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = load_config(&args)?;
    let normalizer = config
        .build_normalizer()
        .await
        .context("Failed to set up normalizer")?;

    let uris = read_uris(args.command.uris())?;
    if uris.is_empty() {
        info!("No input provided. Pass URIs as arguments or pipe them via stdin.");
        normalizer.close().await;
        return Ok(());
    }

    let mut failed = 0usize;
    for uri in &uris {
        match run_one(&normalizer, &args.command, uri).await {
            Ok(line) => println!("{line}"),
            Err(e) => {
                failed += 1;
                error!(uri = %uri, error = %e, "Failed");
                eprintln!("{e:#}");
            }
        }
    }

    normalizer.close().await;
    info!(total = uris.len(), failed, "Done");
    if failed > 0 {
        bail!("{failed} of {} URIs failed", uris.len());
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<NormalizerConfig> {
    let mut config = match &args.config {
        Some(path) => NormalizerConfig::load(path)?,
        None => NormalizerConfig::load_default()?.unwrap_or_default(),
    };
    if let Some(path) = &args.rules {
        config.rules.extend(load_rules_file(path)?);
    }
    if config.rules.is_empty() {
        config.rules = bundled_rules()?;
        info!(rules = config.rules.len(), "No rules configured; using the bundled rule table");
    }
    debug!(rules = config.rules.len(), "Configuration ready");
    Ok(config)
}

fn read_uris(from_args: &[String]) -> Result<Vec<String>> {
    if !from_args.is_empty() {
        return Ok(from_args.to_vec());
    }
    if io::stdin().is_terminal() {
        return Ok(Vec::new());
    }
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

async fn run_one(normalizer: &UriNormalizer, command: &Command, uri: &str) -> Result<String> {
    let line = match command {
        Command::Normalize(args) => normalizer.normalize(uri, !args.no_require_match).await?,
        Command::Resolve(_) => serde_json::to_string(&normalizer.resolve(uri).await?)?,
        Command::Fetch(_) => serde_json::to_string(&normalizer.fetch(uri).await?)?,
    };
    Ok(line)
}
