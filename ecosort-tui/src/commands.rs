//! One-shot subcommands that print to stdout and exit.

use std::ffi::OsStr;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use ecosort_backend::HttpBackend;
use ecosort_core::{
    actuation::best_detection, config::KioskConfig, locator::BackendLocator, model::Endpoint,
    plugin::BackendPlugin,
};
use reqwest::Client;
use tokio::fs;
use tracing::info;

pub(crate) fn locator(config: &KioskConfig, plugin: &BackendPlugin) -> BackendLocator {
    BackendLocator::new(
        Arc::clone(&plugin.health_port),
        config.backend.candidate_list(),
    )
    .with_probe_timeout(config.backend.probe_timeout)
}

/// The pinned backend when one is configured, otherwise the result of discovery.
pub(crate) async fn resolve_endpoint(config: &KioskConfig, locator: &BackendLocator) -> Endpoint {
    match &config.backend.pinned {
        Some(endpoint) => {
            info!(%endpoint, "using configured backend, discovery skipped");
            endpoint.clone()
        }
        None => locator.locate().await,
    }
}

pub(crate) async fn discover(config: &KioskConfig, plugin: &BackendPlugin) -> Result<()> {
    let locator = locator(config, plugin);
    let mut out = io::stdout();

    if let Some(endpoint) = &config.backend.pinned {
        writeln!(out, "pinned backend {endpoint}, candidates not used for kiosk mode")?;
    }

    let mut selected = None;
    for candidate in locator.candidates().candidates() {
        let label = candidate.to_string();
        match locator.probe_latency(candidate).await {
            Ok(latency) => {
                writeln!(out, "{label:<28} ok    {:>5} ms", latency.as_millis())?;
                selected.get_or_insert_with(|| candidate.clone());
            }
            Err(err) => writeln!(out, "{label:<28} fail  {err}")?,
        }
    }

    match selected {
        Some(endpoint) => writeln!(out, "selected {endpoint}")?,
        None => writeln!(
            out,
            "no candidate answered, falling back to {}",
            locator.candidates().fallback()
        )?,
    }
    Ok(())
}

pub(crate) async fn status(
    config: &KioskConfig,
    plugin: &BackendPlugin,
    client: &Client,
) -> Result<()> {
    let endpoint = resolve_endpoint(config, &locator(config, plugin)).await;
    let status = HttpBackend::new(client.clone())
        .stream_status(&endpoint)
        .await
        .with_context(|| format!("querying stream status at {endpoint}"))?;

    let dimensions = status
        .frame_dimensions
        .map_or_else(|| "unknown".to_owned(), |value| value.to_string());

    let mut out = io::stdout();
    writeln!(out, "backend         {endpoint}")?;
    writeln!(out, "has frame       {}", status.has_frame)?;
    writeln!(out, "frame size      {dimensions}")?;
    writeln!(out, "active clients  {}", status.active_clients)?;
    Ok(())
}

pub(crate) async fn classify(
    config: &KioskConfig,
    plugin: &BackendPlugin,
    client: &Client,
    image: &Path,
) -> Result<()> {
    let bytes = fs::read(image)
        .await
        .with_context(|| format!("reading {}", image.display()))?;
    let file_name = image
        .file_name()
        .and_then(OsStr::to_str)
        .unwrap_or("upload.jpg");

    let endpoint = resolve_endpoint(config, &locator(config, plugin)).await;
    let result = HttpBackend::new(client.clone())
        .classify_image(&endpoint, bytes, file_name)
        .await
        .with_context(|| format!("classifying {} at {endpoint}", image.display()))?;

    let mut out = io::stdout();
    if result.predictions.is_empty() {
        writeln!(out, "no detections")?;
    }
    for det in &result.predictions {
        let bin = config
            .mapping
            .bin_for_label(&det.class)
            .map_or_else(|| "unmapped".to_owned(), |bin| format!("bin {}", bin.0 + 1));
        writeln!(out, "{:<12} {:>6.2}  {bin}", det.class, det.confidence)?;
    }

    let decision = best_detection(&result.predictions)
        .filter(|det| det.confidence > config.policy.threshold)
        .and_then(|det| {
            config
                .mapping
                .bin_for_label(&det.class)
                .filter(|bin| bin.0 < config.bin_count)
                .map(|bin| (det, bin))
        });
    match decision {
        Some((det, bin)) => writeln!(out, "would open bin {} for {}", bin.0 + 1, det.class)?,
        None => writeln!(out, "no bin would open")?,
    }

    if let Some(metrics) = result.metrics {
        writeln!(out, "metrics {metrics}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use ecosort_backend as backend;

    use super::*;

    #[tokio::test]
    async fn classify_reports_an_unreadable_image_before_any_request() {
        let mut config = KioskConfig::default();
        config.backend.pinned = Some(Endpoint::new("127.0.0.1", 9));
        let client = Client::builder().no_proxy().build().expect("http client");
        let plugin = backend::plugin(client.clone());

        let err = classify(
            &config,
            &plugin,
            &client,
            Path::new("/nonexistent/ecosort/can.jpg"),
        )
        .await
        .expect_err("missing image");
        assert!(
            err.to_string().starts_with("reading /nonexistent/ecosort/can.jpg"),
            "the read failure names the file: {err}"
        );
    }
}
