//! Provider capability and registry.
//!
//! A provider is one delivery integration. The router only knows the
//! [`Provider`] trait; concrete providers are looked up by [`ProviderId`] in a
//! [`ProviderRegistry`] once, when the router is built.
//!
//! Bundled providers:
//! - [`WebhookProvider`]: POSTs a JSON envelope to a configured URL
//! - [`ConsoleProvider`]: writes the message to the log
//! - [`SimulatedProvider`]: configurable latency and failure rates

mod console;
mod simulated;
mod webhook;

pub use console::{ConsoleConfig, ConsoleProvider};
pub use simulated::{SimulatedConfig, SimulatedProvider};
pub use webhook::{WebhookAuth, WebhookConfig, WebhookProvider};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Result, RouterError};
use crate::message::{Destination, Payload, ProviderId};
use crate::outcome::FailureKind;

/// Failure reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The request can never succeed as given (malformed destination,
    /// unsupported content). Not retried on the same provider.
    #[error("rejected: {reason}")]
    Rejected { reason: String },

    /// Anything else: network failure, vendor outage, vendor-side throttling.
    #[error("transport error: {reason}")]
    Transport { reason: String },
}

impl ProviderError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Rejected { .. } => FailureKind::Rejected,
            Self::Transport { .. } => FailureKind::TransportError,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Rejected { reason } | Self::Transport { reason } => reason,
        }
    }
}

/// One delivery integration.
///
/// Implementations must be safe to call concurrently; a provider wrapping a
/// client that is not must serialize internally.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider type name, for logs.
    fn kind(&self) -> &'static str;

    /// Deliver `payload` to `destination`, returning the provider's receipt id.
    async fn send(
        &self,
        destination: &Destination,
        payload: &Payload,
    ) -> std::result::Result<String, ProviderError>;
}

/// How to build a provider from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderSpec {
    /// HTTP endpoint.
    Webhook(WebhookConfig),
    /// Log-only sink.
    Console(ConsoleConfig),
    /// Synthetic latency and failures.
    Simulated(SimulatedConfig),
}

impl ProviderSpec {
    pub fn provider_type(&self) -> &'static str {
        match self {
            Self::Webhook(_) => "webhook",
            Self::Console(_) => "console",
            Self::Simulated(_) => "simulated",
        }
    }

    /// Instantiate the provider registered under `id`.
    pub fn build(&self, id: &ProviderId) -> Result<Arc<dyn Provider>> {
        let provider: Arc<dyn Provider> = match self {
            Self::Webhook(config) => Arc::new(WebhookProvider::new(id.clone(), config.clone())?),
            Self::Console(config) => Arc::new(ConsoleProvider::new(id.clone(), config.clone())),
            Self::Simulated(config) => {
                Arc::new(SimulatedProvider::new(id.clone(), config.clone())?)
            }
        };
        Ok(provider)
    }
}

/// Provider instances by identity.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderId, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every provider described in `specs`.
    pub fn from_specs(specs: &BTreeMap<String, ProviderSpec>) -> Result<Self> {
        let mut registry = Self::new();
        for (name, spec) in specs {
            let id = ProviderId::new(name);
            let provider = spec.build(&id)?;
            registry.register(id, provider);
        }
        Ok(registry)
    }

    /// Register a provider, replacing any previous one with the same identity.
    pub fn register(&mut self, id: impl Into<ProviderId>, provider: Arc<dyn Provider>) {
        self.providers.insert(id.into(), provider);
    }

    pub fn with(mut self, id: impl Into<ProviderId>, provider: Arc<dyn Provider>) -> Self {
        self.register(id, provider);
        self
    }

    pub fn get(&self, id: &ProviderId) -> Option<Arc<dyn Provider>> {
        self.providers.get(id).cloned()
    }

    /// Resolve `id` for `channel`, failing with a construction error if absent.
    pub(crate) fn resolve(&self, channel: &str, id: &ProviderId) -> Result<Arc<dyn Provider>> {
        self.get(id)
            .ok_or_else(|| RouterError::unknown_provider(channel, id.as_str()))
    }

    pub fn contains(&self, id: &ProviderId) -> bool {
        self.providers.contains_key(id)
    }

    pub fn ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<_> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}
