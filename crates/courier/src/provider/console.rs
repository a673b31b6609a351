//! Provider that writes messages to the log instead of delivering them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Provider, ProviderError};
use crate::message::{Destination, Payload, ProviderId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Prefix for generated receipt ids (default: the provider id).
    #[serde(default)]
    pub receipt_prefix: Option<String>,
}

pub struct ConsoleProvider {
    id: ProviderId,
    prefix: String,
}

impl ConsoleProvider {
    pub fn new(id: ProviderId, config: ConsoleConfig) -> Self {
        let prefix = config
            .receipt_prefix
            .unwrap_or_else(|| id.as_str().to_string());
        Self { id, prefix }
    }
}

#[async_trait]
impl Provider for ConsoleProvider {
    fn kind(&self) -> &'static str {
        "console"
    }

    async fn send(
        &self,
        destination: &Destination,
        payload: &Payload,
    ) -> Result<String, ProviderError> {
        let receipt = format!("{}-{}", self.prefix, uuid::Uuid::new_v4());
        info!(
            provider = %self.id,
            destination = %destination,
            receipt = %receipt,
            "{}",
            payload.to_text()
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receipts_use_prefix() {
        let provider = ConsoleProvider::new(
            ProviderId::new("log"),
            ConsoleConfig {
                receipt_prefix: Some("dev".to_string()),
            },
        );
        let receipt = provider
            .send(&Destination::new("ops@example.com"), &Payload::text("hello"))
            .await
            .unwrap();
        assert!(receipt.starts_with("dev-"));

        let provider = ConsoleProvider::new(ProviderId::new("log"), ConsoleConfig::default());
        let receipt = provider
            .send(&Destination::new("ops@example.com"), &Payload::text("hello"))
            .await
            .unwrap();
        assert!(receipt.starts_with("log-"));
    }
}
