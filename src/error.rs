// Error handling for the Sparkplug host.
//
// This module defines error types and utility functions for error handling.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::result;
use thiserror::Error;

/// Result type for Sparkplug host operations.
pub type Result<T> = result::Result<T, HostError>;

/// Error type for Sparkplug host operations.
#[derive(Debug, Error)]
pub enum HostError {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// The MQTT client could not connect or dropped unexpectedly.
    #[error("MQTT connection error: {0}")]
    Connect(String),

    /// A Sparkplug payload failed to decode.
    #[error("payload decode error: {0}")]
    Decode(String),

    /// A Sparkplug payload failed to encode.
    #[error("payload encode error: {0}")]
    Encode(String),

    /// A message violated the Sparkplug protocol state machine (bad
    /// sequence, DATA before BIRTH, unknown alias, and so on).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The persistence layer failed.
    #[error("store error: {0}")]
    Store(String),

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for HostError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            HostError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            HostError::Connect(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            HostError::Decode(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            HostError::Encode(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            HostError::Protocol(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            HostError::Store(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            HostError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };
        let body = Json(serde_json::json!({
            "error": {
                "message": message,
            }
        }));
        (status, body).into_response()
    }
}

impl From<rusqlite::Error> for HostError {
    fn from(err: rusqlite::Error) -> Self {
        HostError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for HostError {
    fn from(err: serde_json::Error) -> Self {
        HostError::Encode(err.to_string())
    }
}

impl From<config::ConfigError> for HostError {
    fn from(err: config::ConfigError) -> Self {
        HostError::Config(err.to_string())
    }
}

impl From<rumqttc::ClientError> for HostError {
    fn from(err: rumqttc::ClientError) -> Self {
        HostError::Connect(err.to_string())
    }
}

impl From<prost::EncodeError> for HostError {
    fn from(err: prost::EncodeError) -> Self {
        HostError::Encode(err.to_string())
    }
}

impl From<prost::DecodeError> for HostError {
    fn from(err: prost::DecodeError) -> Self {
        HostError::Decode(err.to_string())
    }
}
