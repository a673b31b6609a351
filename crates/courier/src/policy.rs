//! Retry and fallback over an ordered provider sequence.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::executor::AttemptExecutor;
use crate::gate::AdmissionGate;
use crate::message::{Destination, Payload, ProviderId};
use crate::outcome::{AttemptRecord, FailureKind, Outcome, RouteDecision, RouteRole};
use crate::provider::Provider;
use crate::time::{Clock, Sleeper};

/// A provider resolved for one position of the attempt sequence.
#[derive(Clone)]
pub struct RouteStep {
    pub decision: RouteDecision,
    /// Resolved instance for `decision.provider`.
    pub provider: Arc<dyn Provider>,
}

impl std::fmt::Debug for RouteStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteStep")
            .field("decision", &self.decision)
            .field("kind", &self.provider.kind())
            .finish()
    }
}

/// Outcome of a full policy run together with every attempt it made.
#[derive(Debug, Clone)]
pub struct PolicyRun {
    pub outcome: Outcome,
    pub attempts: Vec<AttemptRecord>,
}

impl PolicyRun {
    /// Number of attempts that actually reached a provider.
    pub fn provider_contacts(&self) -> usize {
        self.attempts.iter().filter(|a| a.contacted_provider()).count()
    }
}

/// Build the attempt order: `lead` first, then `fallbacks`, skipping any
/// identity already present earlier.
pub fn attempt_order(lead: RouteDecision, fallbacks: &[ProviderId]) -> Vec<RouteDecision> {
    let mut order = Vec::with_capacity(fallbacks.len() + 1);
    order.push(lead);
    for fallback in fallbacks {
        if order.iter().any(|d| &d.provider == fallback) {
            debug!(provider = %fallback, "skipping duplicate provider in attempt order");
            continue;
        }
        order.push(RouteDecision {
            provider: fallback.clone(),
            role: RouteRole::Fallback,
        });
    }
    order
}

/// Walks an attempt sequence: retries transient failures on the same
/// provider, moves on after a permanent one, and stops at the first success.
pub struct FallbackPolicy {
    max_attempts: u32,
    backoff: Duration,
    executor: AttemptExecutor,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
}

impl FallbackPolicy {
    pub fn new(
        max_attempts: u32,
        backoff: Duration,
        executor: AttemptExecutor,
        sleeper: Arc<dyn Sleeper>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            executor,
            sleeper,
            clock,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Upper bound on the time one run may take over `providers` providers,
    /// ignoring scheduling overhead.
    pub fn worst_case_latency(&self, providers: usize) -> Duration {
        let attempts = self.max_attempts;
        let per_provider = self.executor.timeout().saturating_mul(attempts)
            + self.backoff.saturating_mul(attempts - 1);
        per_provider.saturating_mul(u32::try_from(providers).unwrap_or(u32::MAX))
    }

    /// Walk `steps` until one provider accepts the message.
    ///
    /// Every attempt is admitted through `gate` first. A refusal ends the run
    /// with `rate_limited` and no further provider is tried.
    pub async fn run(
        &self,
        steps: &[RouteStep],
        gate: &AdmissionGate,
        destination: &Destination,
        payload: &Payload,
    ) -> PolicyRun {
        let mut attempts = Vec::new();
        let mut last_failure: Option<Outcome> = None;

        for (index, step) in steps.iter().enumerate() {
            let id = &step.decision.provider;
            if index > 0 {
                warn!(
                    provider = %id,
                    role = %step.decision.role,
                    "falling back to next provider"
                );
            }

            for attempt in 1..=self.max_attempts {
                if !gate.allow() {
                    warn!(provider = %id, attempt, "attempt refused by admission gate");
                    let outcome = Outcome::failure(
                        FailureKind::RateLimited,
                        None,
                        format!("admission ceiling of {} per second reached", gate.ceiling()),
                    );
                    attempts.push(AttemptRecord {
                        provider: id.clone(),
                        role: step.decision.role,
                        attempt,
                        outcome: outcome.clone(),
                        elapsed: Duration::ZERO,
                    });
                    return PolicyRun { outcome, attempts };
                }

                let started = self.clock.now();
                let outcome = self
                    .executor
                    .attempt(id, step.provider.as_ref(), destination, payload)
                    .await;
                let elapsed = self.clock.now().saturating_duration_since(started);

                debug!(
                    provider = %id,
                    role = %step.decision.role,
                    attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    outcome = %outcome,
                    "attempt finished"
                );
                attempts.push(AttemptRecord {
                    provider: id.clone(),
                    role: step.decision.role,
                    attempt,
                    outcome: outcome.clone(),
                    elapsed,
                });

                match outcome.failure_kind() {
                    None => return PolicyRun { outcome, attempts },
                    Some(kind) if !kind.is_transient() => {
                        last_failure = Some(outcome);
                        break;
                    }
                    Some(_) => {
                        last_failure = Some(outcome);
                        if attempt < self.max_attempts {
                            warn!(
                                provider = %id,
                                attempt,
                                backoff_ms = self.backoff.as_millis() as u64,
                                "retrying provider"
                            );
                            self.sleeper.sleep(self.backoff).await;
                        }
                    }
                }
            }
        }

        let outcome = last_failure.unwrap_or_else(|| {
            Outcome::failure(FailureKind::TransportError, None, "no provider was attempted")
        });
        PolicyRun { outcome, attempts }
    }
}

impl std::fmt::Debug for FallbackPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("executor", &self.executor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use crate::time::{ManualClock, RecordingSleeper, TokioClock};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays scripted results, repeating the last one once the script runs out.
    struct Scripted {
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        fallback: Result<String, ProviderError>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            let fallback = script
                .last()
                .cloned()
                .unwrap_or_else(|| Err(ProviderError::transport("empty script")));
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicU32::new(0),
            })
        }

        fn always(result: Result<String, ProviderError>) -> Arc<Self> {
            Self::new(vec![result])
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for Scripted {
        fn kind(&self) -> &'static str {
            "scripted"
        }

        async fn send(&self, _: &Destination, _: &Payload) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn step(name: &str, role: RouteRole, provider: Arc<Scripted>) -> RouteStep {
        RouteStep {
            decision: RouteDecision {
                provider: ProviderId::new(name),
                role,
            },
            provider,
        }
    }

    fn policy(max_attempts: u32, sleeper: RecordingSleeper) -> FallbackPolicy {
        FallbackPolicy::new(
            max_attempts,
            Duration::from_millis(100),
            AttemptExecutor::new(Duration::from_secs(1)),
            Arc::new(sleeper),
            Arc::new(TokioClock),
        )
    }

    fn open_gate() -> AdmissionGate {
        AdmissionGate::with_clock(10_000, Arc::new(ManualClock::new()))
    }

    async fn run(policy: &FallbackPolicy, steps: &[RouteStep], gate: &AdmissionGate) -> PolicyRun {
        policy
            .run(steps, gate, &Destination::new("+15550100"), &Payload::text("hi"))
            .await
    }

    #[test]
    fn attempt_order_skips_duplicates() {
        let lead = RouteDecision {
            provider: ProviderId::new("c"),
            role: RouteRole::Experiment,
        };
        let order = attempt_order(lead, &["a".into(), "c".into(), "b".into(), "a".into()]);
        let names: Vec<_> = order.iter().map(|d| d.provider.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert_eq!(order[0].role, RouteRole::Experiment);
        assert!(order[1..].iter().all(|d| d.role == RouteRole::Fallback));
    }

    #[tokio::test]
    async fn first_success_stops_the_run() {
        let a = Scripted::always(Ok("r-a".into()));
        let b = Scripted::always(Ok("r-b".into()));
        let steps = [
            step("a", RouteRole::Primary, a.clone()),
            step("b", RouteRole::Fallback, b.clone()),
        ];
        let sleeper = RecordingSleeper::new();
        let result = run(&policy(3, sleeper.clone()), &steps, &open_gate()).await;

        assert_eq!(result.outcome.receipt().unwrap().id, "r-a");
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 0);
        assert_eq!(result.attempts.len(), 1);
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn transient_failures_retry_with_backoff_then_fall_back() {
        let a = Scripted::always(Err(ProviderError::transport("503")));
        let b = Scripted::new(vec![Err(ProviderError::transport("reset")), Ok("r-b".into())]);
        let steps = [
            step("a", RouteRole::Primary, a.clone()),
            step("b", RouteRole::Fallback, b.clone()),
        ];
        let sleeper = RecordingSleeper::new();
        let result = run(&policy(3, sleeper.clone()), &steps, &open_gate()).await;

        assert_eq!(result.outcome.receipt().unwrap().provider.as_str(), "b");
        assert_eq!(a.calls(), 3);
        assert_eq!(b.calls(), 2);
        // Two pauses on `a`, one on `b`; none when switching providers.
        assert_eq!(sleeper.calls(), vec![Duration::from_millis(100); 3]);

        let numbering: Vec<_> = result
            .attempts
            .iter()
            .map(|a| (a.provider.as_str().to_string(), a.attempt))
            .collect();
        assert_eq!(
            numbering,
            vec![
                ("a".to_string(), 1),
                ("a".to_string(), 2),
                ("a".to_string(), 3),
                ("b".to_string(), 1),
                ("b".to_string(), 2),
            ]
        );
    }

    #[tokio::test]
    async fn rejection_skips_remaining_attempts_on_that_provider() {
        let a = Scripted::always(Err(ProviderError::rejected("invalid number")));
        let b = Scripted::always(Ok("r-b".into()));
        let steps = [
            step("a", RouteRole::Primary, a.clone()),
            step("b", RouteRole::Fallback, b.clone()),
        ];
        let result = run(&policy(3, RecordingSleeper::new()), &steps, &open_gate()).await;

        assert!(result.outcome.is_success());
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn retries_follow_failure_transience() {
        for err in [
            ProviderError::transport("reset"),
            ProviderError::rejected("invalid number"),
        ] {
            let kind = err.kind();
            let a = Scripted::always(Err(err));
            let steps = [step("a", RouteRole::Primary, a.clone())];
            let result = run(&policy(3, RecordingSleeper::new()), &steps, &open_gate()).await;

            let expected = if kind.is_transient() { 3 } else { 1 };
            assert_eq!(a.calls(), expected, "{kind}");
            assert_eq!(result.outcome.failure_kind(), Some(kind));
        }
    }

    #[tokio::test]
    async fn exhaustion_returns_last_failure() {
        let a = Scripted::always(Err(ProviderError::rejected("invalid number")));
        let b = Scripted::always(Err(ProviderError::transport("vendor b down")));
        let steps = [
            step("a", RouteRole::Primary, a),
            step("b", RouteRole::Fallback, b),
        ];
        let result = run(&policy(2, RecordingSleeper::new()), &steps, &open_gate()).await;

        match result.outcome {
            Outcome::Failure(failure) => {
                assert_eq!(failure.kind, FailureKind::TransportError);
                assert_eq!(failure.provider.unwrap().as_str(), "b");
                assert_eq!(failure.detail, "vendor b down");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn gate_refusal_ends_run_without_fallback() {
        let a = Scripted::always(Err(ProviderError::transport("503")));
        let b = Scripted::always(Ok("r-b".into()));
        let steps = [
            step("a", RouteRole::Primary, a.clone()),
            step("b", RouteRole::Fallback, b.clone()),
        ];
        // Room for exactly one attempt.
        let gate = AdmissionGate::with_clock(1, Arc::new(ManualClock::new()));
        let result = run(&policy(3, RecordingSleeper::new()), &steps, &gate).await;

        assert_eq!(result.outcome.failure_kind(), Some(FailureKind::RateLimited));
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 0);
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.provider_contacts(), 1);
    }

    #[tokio::test]
    async fn empty_sequence_yields_failure() {
        let result = run(&policy(2, RecordingSleeper::new()), &[], &open_gate()).await;
        assert_eq!(result.outcome.failure_kind(), Some(FailureKind::TransportError));
        assert!(result.attempts.is_empty());
    }

    #[test]
    fn worst_case_latency_sums_timeouts_and_backoff() {
        let policy = FallbackPolicy::new(
            3,
            Duration::from_millis(100),
            AttemptExecutor::new(Duration::from_secs(2)),
            Arc::new(RecordingSleeper::new()),
            Arc::new(TokioClock),
        );
        // (3 * 2s + 2 * 100ms) * 2 providers
        assert_eq!(policy.worst_case_latency(2), Duration::from_millis(12_400));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn all_transient_failures_contact_every_provider_max_attempts_times(
            fallbacks in 0usize..5,
            max_attempts in 1u32..5,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();

            let providers: Vec<_> = (0..=fallbacks)
                .map(|_| Scripted::always(Err(ProviderError::transport("down"))))
                .collect();
            let steps: Vec<_> = providers
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let role = if i == 0 { RouteRole::Primary } else { RouteRole::Fallback };
                    step(&format!("p{i}"), role, p.clone())
                })
                .collect();

            let sleeper = RecordingSleeper::new();
            let policy = policy(max_attempts, sleeper.clone());
            let gate = open_gate();
            let result = runtime.block_on(run(&policy, &steps, &gate));

            let expected = (fallbacks + 1) * max_attempts as usize;
            let contacts: u32 = providers.iter().map(|p| p.calls()).sum();
            prop_assert_eq!(contacts as usize, expected);
            prop_assert_eq!(result.provider_contacts(), expected);
            prop_assert_eq!(
                sleeper.calls().len(),
                (fallbacks + 1) * (max_attempts as usize - 1)
            );
            prop_assert_eq!(result.outcome.failure_kind(), Some(FailureKind::TransportError));
        }
    }
}
