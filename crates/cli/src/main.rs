mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use share_valuation_core::models::settings::Settings;
use share_valuation_core::models::valuation::Valuation;
use share_valuation_core::storage::FileStore;
use share_valuation_core::ValuationEngine;
use std::path::PathBuf;
use std::sync::Arc;

use crate::logging::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to a JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the persisted cache
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Set the number of shares held before starting
    #[arg(short, long)]
    shares: Option<u64>,

    /// Alpha Vantage API key (overrides the settings file)
    #[arg(long)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = run(cli).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(key) = cli.api_key {
        settings.api_keys.insert("alphavantage".to_string(), key);
    }

    let data_dir = cli
        .data_dir
        .or_else(|| settings.data_path.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("data"));
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    let store_path = data_dir.join(format!("{}.json", settings.storage_namespace));
    let store = FileStore::open(&store_path)
        .with_context(|| format!("Failed to open store at {}", store_path.display()))?;

    let engine = ValuationEngine::with_default_providers(settings, Arc::new(store))?;
    if let Some(shares) = cli.shares {
        engine.set_shares(shares);
    }

    let mut valuation = engine.current_valuation();
    let mut price = engine.current_price();
    let mut rate = engine.current_rate();
    let online = engine.is_online();

    // A terminal session is in the foreground from the start.
    engine.set_initial_visibility(true, true);
    let handle = engine.start();
    print_line(&engine, *valuation.borrow_and_update(), *online.borrow());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = valuation.changed() => {
                if changed.is_err() { break; }
            }
            changed = price.changed() => {
                if changed.is_err() { break; }
            }
            changed = rate.changed() => {
                if changed.is_err() { break; }
            }
        }
        price.borrow_and_update();
        rate.borrow_and_update();
        print_line(&engine, *valuation.borrow_and_update(), *online.borrow());
    }

    tracing::info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}

fn print_line(engine: &ValuationEngine, valuation: Valuation, online: bool) {
    let price = *engine.current_price().borrow();
    let rate = *engine.current_rate().borrow();
    let last_updated = *engine.last_updated().borrow();
    let updated = last_updated
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());

    println!(
        "{} x {} @ ${price:.2} | USD→GBP {rate:.4} | ${:.2} | £{:.2} | updated {updated}{}",
        engine.shares(),
        engine.settings().symbol,
        valuation.usd_value,
        valuation.gbp_value,
        if online { "" } else { " (offline)" },
    );
}
