// crates/client-lib/src/error.rs

//! Central error type for the room client.
use thiserror::Error;

use crate::validation::ValidationError;

/// Client error types with error codes and user-facing text
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Room limit reached")]
    RoomFull,

    #[error("Server rejected request: {0}")]
    ServerRejected(String),

    #[error("Connection lost: {0}")]
    TransientDisconnect(String),

    #[error("Room is gone: {0}")]
    FatalRoom(String),

    #[error("No active room session")]
    NoActiveSession,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            ClientError::Validation(_) => "VAL_001",
            ClientError::Connection(_) => "CONN_001",
            ClientError::RoomFull => "ROOM_001",
            ClientError::ServerRejected(_) => "ROOM_002",
            ClientError::TransientDisconnect(_) => "CONN_002",
            ClientError::FatalRoom(_) => "ROOM_003",
            ClientError::NoActiveSession => "SESSION_001",
            ClientError::Json(_) => "JSON_001",
            ClientError::Internal(_) => "INT_001",
        }
    }

    /// Text shown to the user in a transient notification
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Validation(_) => "All fields are mandatory.".to_string(),
            ClientError::Connection(_) => "Failed to connect to server".to_string(),
            ClientError::RoomFull => "Room limit reached. Please try later.".to_string(),
            ClientError::ServerRejected(message) if !message.trim().is_empty() => message.clone(),
            ClientError::ServerRejected(_) => "An error occurred".to_string(),
            ClientError::TransientDisconnect(_) => "Connection lost, reconnecting...".to_string(),
            ClientError::FatalRoom(_) => "Room not found. Returning to home.".to_string(),
            ClientError::NoActiveSession => "No room session. Create or join a room first.".to_string(),
            ClientError::Json(_) | ClientError::Internal(_) => "An error occurred".to_string(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Connection(err.to_string())
    }
}
