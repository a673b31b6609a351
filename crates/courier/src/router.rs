//! The notification router: the one entry point callers use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{AdmissionScope, ChannelConfig, RouterConfig};
use crate::error::{Result, RouterError};
use crate::executor::AttemptExecutor;
use crate::gate::AdmissionGate;
use crate::message::{Destination, Payload, ProviderId};
use crate::observer::{DeliveryRecord, DeliverySink, TracingSink};
use crate::outcome::{Outcome, RouteDecision, RouteRole};
use crate::policy::{FallbackPolicy, RouteStep, attempt_order};
use crate::provider::{Provider, ProviderRegistry};
use crate::splitter::{Experiment, RandomSource, ThreadRandom, TrafficSplitter};
use crate::stats::{RouterStats, StatsCollector};
use crate::time::{Clock, Sleeper, TokioClock, TokioSleeper};

/// Everything needed to serve one channel, resolved at construction.
struct ChannelRoute {
    splitter: TrafficSplitter,
    fallbacks: Vec<ProviderId>,
    providers: HashMap<ProviderId, Arc<dyn Provider>>,
    policy: FallbackPolicy,
    gate: Arc<AdmissionGate>,
}

impl ChannelRoute {
    fn steps(&self, lead: RouteDecision) -> Vec<RouteStep> {
        attempt_order(lead, &self.fallbacks)
            .into_iter()
            .filter_map(|decision| {
                let provider = self.providers.get(&decision.provider)?.clone();
                Some(RouteStep { decision, provider })
            })
            .collect()
    }

    /// Length of the longest attempt sequence this channel can produce.
    fn longest_sequence(&self) -> usize {
        let primary = RouteDecision {
            provider: self.splitter.primary().clone(),
            role: RouteRole::Primary,
        };
        let mut longest = attempt_order(primary, &self.fallbacks).len();
        if let Some(experiment) = self.splitter.experiment() {
            let lead = RouteDecision {
                provider: experiment.provider.clone(),
                role: RouteRole::Experiment,
            };
            longest = longest.max(attempt_order(lead, &self.fallbacks).len());
        }
        longest
    }
}

/// Routes messages to providers per channel with retry, fallback, traffic
/// splitting and admission control.
///
/// Built once from a [`RouterConfig`] and a [`ProviderRegistry`]; share it
/// behind an `Arc`. Sends never take a lock around a provider call.
pub struct NotificationRouter {
    channels: HashMap<String, ChannelRoute>,
    sink: Arc<dyn DeliverySink>,
    stats: StatsCollector,
    clock: Arc<dyn Clock>,
}

impl NotificationRouter {
    pub fn builder(config: RouterConfig, registry: ProviderRegistry) -> RouterBuilder {
        RouterBuilder::new(config, registry)
    }

    /// Build with default time sources, random source and the tracing sink.
    pub fn new(config: RouterConfig, registry: ProviderRegistry) -> Result<Self> {
        Self::builder(config, registry).build()
    }

    /// Build with providers constructed from the config's `providers` table.
    pub fn from_config(config: RouterConfig) -> Result<Self> {
        let registry = ProviderRegistry::from_specs(&config.providers)?;
        Self::new(config, registry)
    }

    /// Deliver `payload` to `destination` over `channel`.
    ///
    /// Every delivery result, failures included, is `Ok`. `Err` means the
    /// channel does not exist.
    pub async fn send(
        &self,
        destination: &Destination,
        payload: &Payload,
        channel: &str,
    ) -> Result<Outcome> {
        let route = self
            .channels
            .get(channel)
            .ok_or_else(|| RouterError::unknown_channel(channel))?;

        let started_at = Utc::now();
        let started = self.clock.now();

        let decision = route.splitter.choose_primary();
        debug!(
            channel,
            provider = %decision.provider,
            role = %decision.role,
            "routing message"
        );
        let steps = route.steps(decision.clone());
        let run = route
            .policy
            .run(&steps, &route.gate, destination, payload)
            .await;

        self.stats.observe(&run);
        let record = DeliveryRecord {
            channel: channel.to_string(),
            chosen_provider: decision,
            attempts: run.attempts,
            final_outcome: run.outcome.clone(),
            started_at,
            duration: self.clock.now().saturating_duration_since(started),
        };
        self.sink.record(&record);

        Ok(run.outcome)
    }

    /// Like [`send`](Self::send), but abandons the in-flight attempt when
    /// `token` is cancelled. No record is emitted for a cancelled send.
    pub async fn send_with_cancellation(
        &self,
        destination: &Destination,
        payload: &Payload,
        channel: &str,
        token: &CancellationToken,
    ) -> Result<Outcome> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(channel, "send cancelled by caller");
                Err(RouterError::Cancelled)
            }
            result = self.send(destination, payload, channel) => result,
        }
    }

    /// Configured channel names, sorted.
    pub fn channels(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.channels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn stats(&self) -> RouterStats {
        self.stats.snapshot()
    }

    /// Upper bound on how long one send over `channel` can take:
    /// for each provider, `max_attempts × timeout + (max_attempts − 1) × backoff`.
    pub fn worst_case_latency(&self, channel: &str) -> Result<Duration> {
        let route = self
            .channels
            .get(channel)
            .ok_or_else(|| RouterError::unknown_channel(channel))?;
        Ok(route.policy.worst_case_latency(route.longest_sequence()))
    }
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRouter")
            .field("channels", &self.channels())
            .finish()
    }
}

/// Collaborators that tests and embedders may replace.
pub struct RouterBuilder {
    config: RouterConfig,
    registry: ProviderRegistry,
    sink: Arc<dyn DeliverySink>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl RouterBuilder {
    pub fn new(config: RouterConfig, registry: ProviderRegistry) -> Self {
        Self {
            config,
            registry,
            sink: Arc::new(TracingSink),
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(TokioClock),
            random: Arc::new(ThreadRandom),
        }
    }

    pub fn sink(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Clock read by the admission gates and for attempt timings.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Validate the configuration and resolve every provider it references.
    pub fn build(self) -> Result<NotificationRouter> {
        self.config.validate()?;

        let shared_gate = match self.config.admission {
            AdmissionScope::Shared { per_second } => Some(Arc::new(AdmissionGate::with_clock(
                per_second,
                self.clock.clone(),
            ))),
            AdmissionScope::PerChannel => None,
        };

        let mut channels = HashMap::with_capacity(self.config.channels.len());
        for (name, channel) in &self.config.channels {
            let gate = match &shared_gate {
                Some(gate) => gate.clone(),
                None => Arc::new(AdmissionGate::with_clock(
                    channel.admission_per_second,
                    self.clock.clone(),
                )),
            };
            let route = self.build_route(name, channel, gate)?;
            info!(
                channel = %name,
                primary = %channel.primary,
                fallbacks = channel.fallbacks.len(),
                experiment = channel.experiment.as_ref().map(|e| e.provider.as_str()),
                max_attempts = channel.max_attempts,
                timeout_ms = channel.timeout_ms,
                "channel configured"
            );
            channels.insert(name.clone(), route);
        }

        Ok(NotificationRouter {
            channels,
            sink: self.sink,
            stats: StatsCollector::default(),
            clock: self.clock,
        })
    }

    fn build_route(
        &self,
        name: &str,
        channel: &ChannelConfig,
        gate: Arc<AdmissionGate>,
    ) -> Result<ChannelRoute> {
        let mut providers = HashMap::new();
        for id in channel.referenced_providers() {
            if !providers.contains_key(id) {
                providers.insert(id.clone(), self.registry.resolve(name, id)?);
            }
        }

        let experiment = channel.experiment.as_ref().map(|e| Experiment {
            provider: e.provider.clone(),
            weight: e.weight,
        });

        Ok(ChannelRoute {
            splitter: TrafficSplitter::with_random(
                channel.primary.clone(),
                experiment,
                self.random.clone(),
            ),
            fallbacks: channel.fallbacks.clone(),
            providers,
            policy: FallbackPolicy::new(
                channel.max_attempts,
                channel.backoff(),
                AttemptExecutor::new(channel.timeout()),
                self.sleeper.clone(),
                self.clock.clone(),
            ),
            gate,
        })
    }
}
