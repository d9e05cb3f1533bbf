//! Error types for the fiction-forge client

use http::StatusCode;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Not signed in")]
    Unauthenticated,

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Reorder rejected: {0}")]
    Reorder(#[from] ReorderError),

    #[error("Request cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ForgeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ForgeError::WebSocket(Box::new(err))
    }
}

impl ForgeError {
    /// True for failures caused by a missing or rejected session rather
    /// than the network.
    pub fn is_auth(&self) -> bool {
        match self {
            ForgeError::Unauthenticated | ForgeError::Auth(_) => true,
            ForgeError::Api { status, .. } => {
                *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
            }
            _ => false,
        }
    }
}

/// Reasons a reorder is refused before anything is written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReorderError {
    #[error("item is already at that position")]
    NoOp,

    #[error("position {position} is outside 1..={len}")]
    OutOfRange { position: u32, len: usize },

    #[error("item {0} is not in the list")]
    ItemNotFound(Uuid),

    #[error("list has not been loaded")]
    NotLoaded,
}

pub type Result<T> = std::result::Result<T, ForgeError>;
