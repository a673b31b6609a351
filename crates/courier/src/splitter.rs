//! Weighted choice between the configured primary and an experiment provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::message::ProviderId;
use crate::outcome::{RouteDecision, RouteRole};

/// Source of uniform samples in `[0, 1)`.
pub trait RandomSource: Send + Sync {
    fn sample(&self) -> f64;
}

/// Thread-local RNG; no state shared between callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn sample(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Replays a fixed list of samples, cycling when exhausted. An empty list
/// always yields `0.0`.
#[derive(Debug)]
pub struct SequenceRandom {
    samples: Vec<f64>,
    next: AtomicUsize,
}

impl SequenceRandom {
    pub fn new(samples: Vec<f64>) -> Self {
        Self {
            samples,
            next: AtomicUsize::new(0),
        }
    }
}

impl RandomSource for SequenceRandom {
    fn sample(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed);
        self.samples[idx % self.samples.len()]
    }
}

/// Alternative provider that leads a weighted share of sends.
#[derive(Debug, Clone)]
pub struct Experiment {
    /// Provider tried first when the experiment is selected.
    pub provider: ProviderId,
    /// Fraction of traffic diverted to `provider`, within `[0, 1]`.
    pub weight: f64,
}

/// Chooses the lead provider of each send, diverting a share of traffic
/// to the channel's experiment.
pub struct TrafficSplitter {
    primary: ProviderId,
    experiment: Option<Experiment>,
    random: Arc<dyn RandomSource>,
}

impl TrafficSplitter {
    pub fn new(primary: ProviderId, experiment: Option<Experiment>) -> Self {
        Self::with_random(primary, experiment, Arc::new(ThreadRandom))
    }

    /// Splitter drawing samples from `random`.
    pub fn with_random(
        primary: ProviderId,
        experiment: Option<Experiment>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            primary,
            experiment,
            random,
        }
    }

    /// Pick the provider that leads the attempt sequence for one send.
    pub fn choose_primary(&self) -> RouteDecision {
        if let Some(experiment) = &self.experiment {
            if experiment.weight > 0.0 && self.random.sample() < experiment.weight {
                return RouteDecision {
                    provider: experiment.provider.clone(),
                    role: RouteRole::Experiment,
                };
            }
        }
        RouteDecision {
            provider: self.primary.clone(),
            role: RouteRole::Primary,
        }
    }

    pub fn primary(&self) -> &ProviderId {
        &self.primary
    }

    pub fn experiment(&self) -> Option<&Experiment> {
        self.experiment.as_ref()
    }
}

impl std::fmt::Debug for TrafficSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficSplitter")
            .field("primary", &self.primary)
            .field("experiment", &self.experiment)
            .finish()
    }
}
