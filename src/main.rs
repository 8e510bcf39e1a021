use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use usersearch_harvest::config::{Cli, HarvestConfig, StoreKind};
use usersearch_harvest::driver::{BrowserDriver, ChromiumDriver};
use usersearch_harvest::process::{harvest, HarvestOptions};
use usersearch_harvest::store::{FileSink, SqliteSink, SqliteStore};
use usersearch_harvest::{info_time, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let start_time = Local::now();
    // Anything missing here ends the run before a browser is started.
    let config = HarvestConfig::load(&cli)?;

    let driver = Arc::new(ChromiumDriver::launch(config.headless).await?);
    driver.set_auth_cookie(&config.auth_token).await?;

    let options = HarvestOptions {
        search_query: config.search_query.clone(),
        max_scrolls: config.max_scrolls,
        scroll_interval: config.scroll_interval,
        settle: config.settle,
        dump_responses: config.dump_responses.clone(),
    };
    let report = match config.store {
        StoreKind::Sqlite => {
            let sink = SqliteSink::new(SqliteStore::open(&config.db_path)?);
            harvest(driver.clone(), sink, options).await?
        }
        StoreKind::File => {
            let sink = FileSink::new(&config.entries_file);
            harvest(driver.clone(), sink, options).await?
        }
    };

    if let Ok(driver) = Arc::try_unwrap(driver) {
        driver.close().await?;
    }
    info_time!(
        start_time,
        "Full program time: {} accepted responses, {} entries, {} persisted, {} decode failures, {} malformed, {} failed saves",
        report.accepted_responses,
        report.entries_accumulated,
        report.entries_persisted,
        report.decode_failures,
        report.malformed_payloads,
        report.persist_failures
    );

    Ok(())
}
