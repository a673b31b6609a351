//! Single bounded provider call.

use std::time::Duration;

use tracing::debug;

use crate::message::{Destination, Payload, ProviderId};
use crate::outcome::{FailureKind, Outcome};
use crate::provider::Provider;

/// Runs one provider call under a time budget.
///
/// When the budget runs out the provider future is dropped and the attempt
/// reports `timeout`. Whatever the provider would have produced afterwards is
/// discarded; nothing is spawned, so nothing outlives the attempt.
#[derive(Debug, Clone, Copy)]
pub struct AttemptExecutor {
    timeout: Duration,
}

impl AttemptExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn attempt(
        &self,
        id: &ProviderId,
        provider: &dyn Provider,
        destination: &Destination,
        payload: &Payload,
    ) -> Outcome {
        match tokio::time::timeout(self.timeout, provider.send(destination, payload)).await {
            Ok(Ok(receipt)) => Outcome::success(id.clone(), receipt),
            Ok(Err(err)) => {
                debug!(provider = %id, kind = %err.kind(), "provider reported failure: {}", err.reason());
                Outcome::failure(err.kind(), Some(id.clone()), err.reason())
            }
            Err(_) => Outcome::failure(
                FailureKind::Timeout,
                Some(id.clone()),
                format!("no response within {}ms", self.timeout.as_millis()),
            ),
        }
    }
}
