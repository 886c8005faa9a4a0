use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed value for field '{field}': {reason}")]
    MalformedField { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, TunnelError>;
