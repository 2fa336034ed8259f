//! Error types for the polystrat trading engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Connection failure: {message}")]
    Connection { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Ledger invariant violation: {0}")]
    Ledger(String),
}

impl Error {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
