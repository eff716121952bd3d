//! Client for the EcoSort classification backend over HTTP and WebSocket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use ecosort_core::{
    model::{Detection, Endpoint},
    plugin::BackendPlugin,
    ports::{HealthPort, PortError, PredictionPort},
};

pub mod ws;

pub use ws::WebSocketPush;

const HEALTH_PATH: &str = "/health";
const PREDICTIONS_PATH: &str = "/api/current-predictions";
const PREDICT_PATH: &str = "/api/predict";
const STREAM_STATUS_PATH: &str = "/api/stream/status";

/// Upper bound for an upload classification, which runs inference on the backend.
pub const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Response from /api/current-predictions
#[derive(Debug, Deserialize)]
struct PredictionsResponse {
    #[serde(default)]
    predictions: Vec<Detection>,
}

/// Camera stream state reported by `/api/stream/status`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamStatus {
    /// Whether the backend holds a frame from the camera.
    #[serde(default)]
    pub has_frame: bool,
    /// Frame size as reported by the backend, shape left open.
    #[serde(default)]
    pub frame_dimensions: Option<serde_json::Value>,
    /// Number of connected push clients.
    #[serde(default)]
    pub active_clients: u32,
}

/// Result of classifying an uploaded image.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyResponse {
    /// Detections found in the image.
    #[serde(default)]
    pub predictions: Vec<Detection>,
    /// Timing and model metrics, passed through untouched.
    #[serde(default)]
    pub metrics: Option<serde_json::Value>,
}

/// HTTP side of the backend: health, polling, and the collaborator endpoints.
pub struct HttpBackend {
    client: Client,
}

impl HttpBackend {
    /// Create a backend client bound to the given HTTP client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Fetch the camera stream state.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the request fails or the body is not a stream status.
    pub async fn stream_status(&self, endpoint: &Endpoint) -> Result<StreamStatus, PortError> {
        fetch_json(self.client.get(endpoint.http_url(STREAM_STATUS_PATH))).await
    }

    /// Upload one image for classification as multipart field `file`.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the upload fails, times out, or the body cannot be decoded.
    pub async fn classify_image(
        &self,
        endpoint: &Endpoint,
        image: Vec<u8>,
        file_name: &str,
    ) -> Result<ClassifyResponse, PortError> {
        let size = image.len();
        let part = Part::bytes(image)
            .file_name(file_name.to_owned())
            .mime_str(image_mime(file_name))?;
        let req = self
            .client
            .post(endpoint.http_url(PREDICT_PATH))
            .multipart(Form::new().part("file", part))
            .timeout(CLASSIFY_TIMEOUT);

        debug!(%endpoint, file_name, size, "uploading image for classification");
        fetch_json(req).await
    }
}

#[async_trait]
impl HealthPort for HttpBackend {
    async fn health(&self, endpoint: &Endpoint) -> Result<(), PortError> {
        send_checked(self.client.get(endpoint.http_url(HEALTH_PATH))).await?;
        Ok(())
    }
}

#[async_trait]
impl PredictionPort for HttpBackend {
    async fn current_predictions(&self, endpoint: &Endpoint) -> Result<Vec<Detection>, PortError> {
        let resp =
            fetch_json::<PredictionsResponse>(self.client.get(endpoint.http_url(PREDICTIONS_PATH)))
                .await?;
        Ok(resp.predictions)
    }
}

/// Build the plugin bundle talking to a real backend.
#[must_use]
pub fn plugin(client: Client) -> BackendPlugin {
    let http = Arc::new(HttpBackend::new(client));

    BackendPlugin {
        health_port: Arc::<HttpBackend>::clone(&http),
        prediction_port: http,
        push_port: Arc::new(WebSocketPush::new()),
    }
}

fn image_mime(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_stem, extension)| extension.to_ascii_lowercase());

    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

// Send a request and turn any non-2xx answer into `PortError::Status`.
async fn send_checked(req: RequestBuilder) -> Result<Response, PortError> {
    let resp = req.send().await.map_err(PortError::from)?;
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(PortError::Status(status.as_u16()))
    }
}

// Small helper to fetch and decode JSON with status handling.
async fn fetch_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, PortError> {
    let body = send_checked(req)
        .await?
        .bytes()
        .await
        .map_err(PortError::from)?;
    serde_json::from_slice(&body).map_err(PortError::from)
}
