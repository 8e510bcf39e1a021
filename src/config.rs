use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Deserialize;

use crate::{Error, Result, AUTH_TOKEN_ENV};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// Per-query collections in a SQLite database.
    Sqlite,
    /// One deduplicated JSON file.
    File,
}

/// Harvest user search results by scrolling the search page.
#[derive(Debug, Parser)]
#[command(name = "usersearch-harvest", version, about)]
pub struct Cli {
    /// JSON config file with searchQuery, maxScrolls, scrollInterval, headless.
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,
    /// Overrides `searchQuery` from the config file.
    #[arg(long)]
    pub query: Option<String>,
    /// Overrides `maxScrolls`.
    #[arg(long, allow_negative_numbers = true)]
    pub max_scrolls: Option<i64>,
    /// Overrides `scrollInterval`, in milliseconds.
    #[arg(long)]
    pub scroll_interval_ms: Option<u64>,
    /// Overrides `headless`.
    #[arg(long)]
    pub headless: Option<bool>,
    #[arg(long, value_enum, default_value_t = StoreKind::Sqlite)]
    pub store: StoreKind,
    #[arg(long, default_value = "harvest.db")]
    pub db_path: PathBuf,
    #[arg(long, default_value = "usersEntries.json")]
    pub entries_file: PathBuf,
    /// Write every accepted response to this file when the run ends.
    #[arg(long)]
    pub dump_responses: Option<PathBuf>,
    /// How long to keep reading responses once scrolling stopped.
    #[arg(long, default_value_t = 3000)]
    pub settle_ms: u64,
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Contents of the config file. Every key may be missing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    pub search_query: Option<String>,
    pub max_scrolls: Option<i64>,
    #[serde(alias = "scrollIntervalMs")]
    pub scroll_interval: Option<u64>,
    pub headless: Option<bool>,
}

impl FileConfig {
    /// A missing file is an empty config, a broken one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(Error::ConfigRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&content).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Everything a run needs, after the file and CLI have been merged and checked.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub search_query: String,
    pub max_scrolls: i64,
    pub scroll_interval: Duration,
    pub headless: bool,
    pub auth_token: String,
    pub store: StoreKind,
    pub db_path: PathBuf,
    pub entries_file: PathBuf,
    pub dump_responses: Option<PathBuf>,
    pub settle: Duration,
}

impl HarvestConfig {
    pub const DEFAULT_MAX_SCROLLS: i64 = 2;
    pub const DEFAULT_SCROLL_INTERVAL_MS: u64 = 2000;

    /// Reads the config file and the auth token from the environment.
    pub fn load(cli: &Cli) -> Result<Self> {
        let file = FileConfig::load(&cli.config)?;
        let auth_token = std::env::var(AUTH_TOKEN_ENV).ok();
        Self::resolve(cli, file, auth_token)
    }

    /// CLI flags win over the file. Fails on a blank query or a missing token.
    pub fn resolve(cli: &Cli, file: FileConfig, auth_token: Option<String>) -> Result<Self> {
        let search_query = cli
            .query
            .clone()
            .or(file.search_query)
            .filter(|q| !q.trim().is_empty())
            .ok_or(Error::MissingSearchQuery)?;
        let auth_token = auth_token
            .filter(|t| !t.trim().is_empty())
            .ok_or(Error::MissingAuthToken(AUTH_TOKEN_ENV))?;

        let scroll_interval_ms = cli
            .scroll_interval_ms
            .or(file.scroll_interval)
            .unwrap_or(Self::DEFAULT_SCROLL_INTERVAL_MS);

        Ok(Self {
            search_query,
            max_scrolls: cli
                .max_scrolls
                .or(file.max_scrolls)
                .unwrap_or(Self::DEFAULT_MAX_SCROLLS),
            scroll_interval: Duration::from_millis(scroll_interval_ms),
            headless: cli.headless.or(file.headless).unwrap_or(true),
            auth_token,
            store: cli.store,
            db_path: cli.db_path.clone(),
            entries_file: cli.entries_file.clone(),
            dump_responses: cli.dump_responses.clone(),
            settle: Duration::from_millis(cli.settle_ms),
        })
    }
}
