//! Provider with configurable latency and failure rates.
//!
//! Used for dry runs and load simulations from the command line: a route can
//! be exercised end to end without any external service.

use std::time::Duration;

use async_trait::async_trait;
use rand::RngExt;
use serde::{Deserialize, Serialize};

use super::{Provider, ProviderError};
use crate::error::{Result, RouterError};
use crate::message::{Destination, Payload, ProviderId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    /// Base latency of every call in milliseconds.
    #[serde(default)]
    pub latency_ms: u64,
    /// Extra random latency in `[0, jitter_ms)`.
    #[serde(default)]
    pub jitter_ms: u64,
    /// Probability of a transient failure.
    #[serde(default)]
    pub failure_rate: f64,
    /// Probability of a permanent rejection.
    #[serde(default)]
    pub reject_rate: f64,
    /// Destinations containing this substring are always rejected.
    #[serde(default)]
    pub reject_destinations_containing: Option<String>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            jitter_ms: 0,
            failure_rate: 0.0,
            reject_rate: 0.0,
            reject_destinations_containing: None,
        }
    }
}

pub struct SimulatedProvider {
    id: ProviderId,
    config: SimulatedConfig,
}

impl SimulatedProvider {
    pub fn new(id: ProviderId, config: SimulatedConfig) -> Result<Self> {
        for (name, rate) in [
            ("failure_rate", config.failure_rate),
            ("reject_rate", config.reject_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(RouterError::invalid_provider(
                    id.as_str(),
                    format!("{name} must be within [0, 1], got {rate}"),
                ));
            }
        }
        if config.failure_rate + config.reject_rate > 1.0 {
            return Err(RouterError::invalid_provider(
                id.as_str(),
                "failure_rate + reject_rate must not exceed 1",
            ));
        }
        Ok(Self { id, config })
    }

    fn latency(&self) -> Duration {
        let jitter = if self.config.jitter_ms > 0 {
            rand::rng().random_range(0..self.config.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.config.latency_ms.saturating_add(jitter))
    }
}

#[async_trait]
impl Provider for SimulatedProvider {
    fn kind(&self) -> &'static str {
        "simulated"
    }

    async fn send(
        &self,
        destination: &Destination,
        _payload: &Payload,
    ) -> std::result::Result<String, ProviderError> {
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(pattern) = &self.config.reject_destinations_containing {
            if destination.as_str().contains(pattern.as_str()) {
                return Err(ProviderError::rejected(format!(
                    "{} does not accept destination {destination}",
                    self.id
                )));
            }
        }

        let roll = rand::random::<f64>();
        if roll < self.config.reject_rate {
            Err(ProviderError::rejected(format!("{} rejected the message", self.id)))
        } else if roll < self.config.reject_rate + self.config.failure_rate {
            Err(ProviderError::transport(format!("{} is unavailable", self.id)))
        } else {
            Ok(format!("{}-{}", self.id, uuid::Uuid::new_v4()))
        }
    }
}
