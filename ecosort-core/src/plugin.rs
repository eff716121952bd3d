//! Bundle of port implementations that make up one backend client.

use std::sync::Arc;

use crate::ports::{HealthPort, PredictionPort, PushPort};

/// Collection of ports implementing access to a classification backend.
#[derive(Clone)]
pub struct BackendPlugin {
    /// Health probes for discovery and verification.
    pub health_port: Arc<dyn HealthPort>,
    /// Periodic prediction polling.
    pub prediction_port: Arc<dyn PredictionPort>,
    /// Persistent push channel.
    pub push_port: Arc<dyn PushPort>,
}

impl BackendPlugin {
    /// Bundle one value implementing every port.
    #[must_use]
    pub fn from_shared<T>(backend: Arc<T>) -> Self
    where
        T: HealthPort + PredictionPort + PushPort + 'static,
    {
        Self {
            health_port: Arc::<T>::clone(&backend),
            prediction_port: Arc::<T>::clone(&backend),
            push_port: backend,
        }
    }
}
