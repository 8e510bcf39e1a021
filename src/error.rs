use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::driver::InterceptedResponse;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No search query given. Set `searchQuery` in the config file or pass --query.")]
    MissingSearchQuery,
    #[error("Authentication token not found. Set the {0} environment variable.")]
    MissingAuthToken(&'static str),
    #[error("Couldn't read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Config file {path} is not valid JSON: {source}")]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Browser Error: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),
    #[error("Browser setup failed: {0}")]
    BrowserSetup(String),
    #[error("Response body for request {0} couldn't be decoded")]
    BodyEncoding(String),

    #[error("Sqlite Error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),
    #[error("Couldn't send a response through a channel.")]
    RuntimeSendError,
}

impl From<mpsc::error::SendError<InterceptedResponse>> for Error {
    fn from(_value: mpsc::error::SendError<InterceptedResponse>) -> Self {
        Error::RuntimeSendError
    }
}
