//! Traits describing backend capabilities and the errors they report.

use async_trait::async_trait;
use reqwest::Error as ReqwestError;
use serde_json::Error as JsonError;

use crate::model::{Detection, Endpoint, PushMessage};

#[derive(thiserror::Error, Debug)]
/// Errors that can occur while talking to the classification backend.
pub enum PortError {
    /// Network layer failed.
    #[error("Network error: {0}")]
    Network(#[from] ReqwestError),
    /// Backend payload was not the JSON we expected.
    #[error("Decode error: {0}")]
    Decode(#[from] JsonError),
    /// Push channel could not be opened or broke mid-stream.
    #[error("Channel error: {0}")]
    Channel(String),
    /// The request did not finish within its time bound.
    #[error("Timed out after {0} ms")]
    Timeout(u128),
    /// Backend answered with a non-success status.
    #[error("Unexpected status {0}")]
    Status(u16),
}

#[async_trait]
/// Liveness check used by discovery and post-selection verification.
pub trait HealthPort: Send + Sync {
    /// Issue `GET /health` against `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the backend is unreachable or answers with a failure status.
    async fn health(&self, endpoint: &Endpoint) -> Result<(), PortError>;
}

#[async_trait]
/// Pull access to the detector's latest output.
pub trait PredictionPort: Send + Sync {
    /// Fetch the detections for the most recent frame.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the request fails or the body cannot be decoded.
    async fn current_predictions(&self, endpoint: &Endpoint) -> Result<Vec<Detection>, PortError>;
}

#[async_trait]
/// Opens the persistent push channel.
pub trait PushPort: Send + Sync {
    /// Connect to the backend's frontend stream.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Channel`] or [`PortError::Network`] when the handshake fails.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn PushConnection>, PortError>;
}

#[async_trait]
/// An open push channel yielding decoded messages.
pub trait PushConnection: Send {
    /// Next message, `Some(Err(_))` for a message that could not be read or decoded,
    /// and `None` once the connection is closed.
    async fn next_message(&mut self) -> Option<Result<PushMessage, PortError>>;
}
