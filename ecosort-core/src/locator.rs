//! Discovery of a reachable classification backend on the local network.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use crate::model::{Endpoint, is_loopback_host};
use crate::ports::{HealthPort, PortError};

/// Upper bound for a single health probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
/// Ordered probe list. The fallback endpoint is always the last entry.
pub struct CandidateList {
    candidates: Vec<Endpoint>,
    fallback: Endpoint,
}

impl CandidateList {
    /// Build a list from `candidates`, dropping duplicates and appending `fallback` last.
    #[must_use]
    pub fn new<I: IntoIterator<Item = Endpoint>>(candidates: I, fallback: Endpoint) -> Self {
        let mut list = Self {
            candidates: Vec::new(),
            fallback: fallback.clone(),
        };
        for candidate in candidates {
            list.push_unique(candidate);
        }
        list.candidates.retain(|candidate| *candidate != fallback);
        list.candidates.push(fallback);
        list
    }

    /// Put the kiosk's own host first unless it is a loopback name.
    ///
    /// The backend usually runs on the machine that serves the kiosk, so it gets the first probe.
    /// The fallback stays last, even when it names the same endpoint.
    #[must_use]
    pub fn with_page_host(mut self, host: Option<&str>, port: u16) -> Self {
        let Some(host) = host.map(str::trim).filter(|host| !host.is_empty()) else {
            return self;
        };
        if is_loopback_host(host) {
            return self;
        }

        let endpoint = Endpoint::new(host, port);
        self.candidates.retain(|candidate| *candidate != endpoint);
        self.candidates.insert(0, endpoint);
        if self.candidates.last() != Some(&self.fallback) {
            self.candidates.push(self.fallback.clone());
        }
        self
    }

    /// Endpoints in probe order, fallback included.
    #[must_use]
    pub fn candidates(&self) -> &[Endpoint] {
        &self.candidates
    }

    /// The endpoint returned when every probe fails.
    #[must_use]
    pub fn fallback(&self) -> &Endpoint {
        &self.fallback
    }

    fn push_unique(&mut self, endpoint: Endpoint) {
        if !self.candidates.contains(&endpoint) {
            self.candidates.push(endpoint);
        }
    }
}

/// Probes candidates in order and settles on the first healthy one.
pub struct BackendLocator {
    health_port: Arc<dyn HealthPort>,
    candidates: CandidateList,
    probe_timeout: Duration,
}

impl BackendLocator {
    /// Create a locator with the default probe timeout.
    #[must_use]
    pub fn new(health_port: Arc<dyn HealthPort>, candidates: CandidateList) -> Self {
        Self {
            health_port,
            candidates,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Override the per-candidate timeout.
    #[must_use]
    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Candidates this locator will try.
    #[must_use]
    pub fn candidates(&self) -> &CandidateList {
        &self.candidates
    }

    /// Return the first candidate whose health probe succeeds, or the fallback when none does.
    ///
    /// Single pass, no retries.
    pub async fn locate(&self) -> Endpoint {
        for candidate in self.candidates.candidates() {
            debug!(%candidate, "probing backend");
            match self.probe(candidate).await {
                Ok(()) => {
                    info!(endpoint = %candidate, "backend found");
                    return candidate.clone();
                }
                Err(err) => debug!(%candidate, error = %err, "candidate unavailable"),
            }
        }

        let fallback = self.candidates.fallback().clone();
        warn!(endpoint = %fallback, "no candidate answered, using fallback");
        fallback
    }

    /// One confirmatory health call against the chosen endpoint.
    pub async fn verify(&self, endpoint: &Endpoint) -> bool {
        match self.probe(endpoint).await {
            Ok(()) => true,
            Err(err) => {
                warn!(%endpoint, error = %err, "backend verification failed");
                false
            }
        }
    }

    /// Round trip of one health call.
    ///
    /// # Errors
    ///
    /// Returns the probe's [`PortError`], or [`PortError::Timeout`] when it exceeds the bound.
    pub async fn probe_latency(&self, endpoint: &Endpoint) -> Result<Duration, PortError> {
        let started = Instant::now();
        self.probe(endpoint).await?;
        Ok(started.elapsed())
    }

    async fn probe(&self, endpoint: &Endpoint) -> Result<(), PortError> {
        timeout(self.probe_timeout, self.health_port.health(endpoint))
            .await
            .map_err(|_elapsed| PortError::Timeout(self.probe_timeout.as_millis()))?
    }
}
