//! Router counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::message::ProviderId;
use crate::outcome::{FailureKind, Outcome};
use crate::policy::PolicyRun;

#[derive(Debug, Default)]
pub(crate) struct StatsCollector {
    sends: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    rate_limited: AtomicU64,
    provider_attempts: DashMap<ProviderId, AtomicU64>,
}

impl StatsCollector {
    pub(crate) fn observe(&self, run: &PolicyRun) {
        self.sends.fetch_add(1, Ordering::Relaxed);
        match &run.outcome {
            Outcome::Success(_) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Outcome::Failure(failure) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                if failure.kind == FailureKind::RateLimited {
                    self.rate_limited.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        for attempt in run.attempts.iter().filter(|a| a.contacted_provider()) {
            self.provider_attempts
                .entry(attempt.provider.clone())
                .or_default()
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> RouterStats {
        RouterStats {
            sends: self.sends.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            provider_attempts: self
                .provider_attempts
                .iter()
                .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

/// Point-in-time view of router activity since construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    /// Completed sends.
    pub sends: u64,
    pub delivered: u64,
    /// Sends that ended in a failure of any kind, rate limiting included.
    pub failed: u64,
    pub rate_limited: u64,
    /// Provider contacts, by provider.
    pub provider_attempts: BTreeMap<ProviderId, u64>,
}

impl RouterStats {
    pub fn attempts_for(&self, provider: &str) -> u64 {
        self.provider_attempts
            .get(&ProviderId::new(provider))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_attempts(&self) -> u64 {
        self.provider_attempts.values().sum()
    }
}
