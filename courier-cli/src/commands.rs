use std::io::{self, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use courier_engine::{
    Destination, FailureKind, NotificationRouter, Outcome, Payload, RouterConfig, RouterStats,
};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::OutputFormat;

pub fn load_config(path: &std::path::Path) -> Result<RouterConfig> {
    RouterConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

pub fn build_router(config: RouterConfig) -> Result<NotificationRouter> {
    NotificationRouter::from_config(config).context("failed to build router")
}

/// Resolve the message body from the command line or stdin.
pub fn read_payload(message: Option<String>, json: Option<String>) -> Result<Payload> {
    if let Some(raw) = json {
        let value: serde_json::Value =
            serde_json::from_str(&raw).context("--json is not a valid JSON document")?;
        return Ok(Payload::Structured(value));
    }
    let text = match message {
        Some(text) => text,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if text.is_empty() {
        bail!("message body is empty");
    }
    Ok(Payload::Text(text))
}

/// Send one message; returns whether it was delivered.
pub async fn send(
    router: &NotificationRouter,
    channel: &str,
    to: &str,
    payload: Payload,
    output: OutputFormat,
) -> Result<bool> {
    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, abandoning send");
            ctrl_c.cancel();
        }
    });

    let destination = Destination::new(to);
    let outcome = router
        .send_with_cancellation(&destination, &payload, channel, &token)
        .await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputFormat::Pretty => match &outcome {
            Outcome::Success(receipt) => {
                println!("delivered via {} (receipt {})", receipt.provider, receipt.id)
            }
            Outcome::Failure(failure) => println!("not delivered: {failure}"),
        },
    }
    Ok(outcome.is_success())
}

#[derive(Debug, Serialize)]
struct ChannelReport {
    channel: String,
    primary: String,
    fallbacks: Vec<String>,
    experiment: Option<serde_json::Value>,
    max_attempts: u32,
    timeout_ms: u64,
    backoff_ms: u64,
    worst_case_latency_ms: u64,
}

/// Validate the configuration by building a router from it.
pub fn check(config: RouterConfig, output: OutputFormat) -> Result<()> {
    let channels = config.channels.clone();
    let admission = config.admission.clone();
    let providers: Vec<_> = config
        .providers
        .iter()
        .map(|(name, spec)| (name.clone(), spec.provider_type()))
        .collect();
    let router = build_router(config)?;

    let mut reports = Vec::with_capacity(channels.len());
    for (name, channel) in &channels {
        let worst = router.worst_case_latency(name)?;
        reports.push(ChannelReport {
            channel: name.clone(),
            primary: channel.primary.to_string(),
            fallbacks: channel.fallbacks.iter().map(ToString::to_string).collect(),
            experiment: channel
                .experiment
                .as_ref()
                .map(|e| json!({ "provider": e.provider, "weight": e.weight })),
            max_attempts: channel.max_attempts,
            timeout_ms: channel.timeout_ms,
            backoff_ms: channel.backoff_ms,
            worst_case_latency_ms: millis(worst),
        });
    }

    match output {
        OutputFormat::Json => {
            let doc = json!({
                "admission": admission,
                "providers": providers
                    .iter()
                    .map(|(name, kind)| json!({ "id": name, "type": kind }))
                    .collect::<Vec<_>>(),
                "channels": reports,
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        OutputFormat::Pretty => {
            println!("configuration OK");
            println!("admission: {admission:?}");
            for (name, kind) in &providers {
                println!("provider {name} ({kind})");
            }
            for report in &reports {
                let mut route = vec![report.primary.clone()];
                route.extend(report.fallbacks.iter().cloned());
                println!(
                    "channel {}: {} | attempts {} | timeout {}ms | backoff {}ms | worst case {}ms",
                    report.channel,
                    route.join(" -> "),
                    report.max_attempts,
                    report.timeout_ms,
                    report.backoff_ms,
                    report.worst_case_latency_ms,
                );
                if let Some(experiment) = &report.experiment {
                    println!("  experiment: {experiment}");
                }
            }
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    channel: String,
    count: usize,
    elapsed_ms: u64,
    outcomes: OutcomeCounts,
    stats: RouterStats,
}

#[derive(Debug, Default, Serialize)]
struct OutcomeCounts {
    delivered: usize,
    rejected: usize,
    timeout: usize,
    transport_error: usize,
    rate_limited: usize,
}

impl OutcomeCounts {
    fn add(&mut self, outcome: &Outcome) {
        match outcome.failure_kind() {
            None => self.delivered += 1,
            Some(FailureKind::Rejected) => self.rejected += 1,
            Some(FailureKind::Timeout) => self.timeout += 1,
            Some(FailureKind::TransportError) => self.transport_error += 1,
            Some(FailureKind::RateLimited) => self.rate_limited += 1,
        }
    }
}

/// Push `count` synthetic sends through `channel`, `concurrency` at a time.
pub async fn simulate(
    router: Arc<NotificationRouter>,
    channel: &str,
    count: usize,
    concurrency: usize,
    to: &str,
    output: OutputFormat,
) -> Result<()> {
    if !router.channels().contains(&channel) {
        bail!("unknown channel `{channel}`");
    }
    info!(channel, count, concurrency, "starting simulation");

    let destination = Destination::new(to);
    let started = Instant::now();
    let outcomes: Vec<_> = stream::iter(0..count)
        .map(|i| {
            let router = router.clone();
            let destination = destination.clone();
            let channel = channel.to_string();
            async move {
                let payload = Payload::text(format!("simulated message #{i}"));
                router.send(&destination, &payload, &channel).await
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut counts = OutcomeCounts::default();
    for outcome in outcomes {
        counts.add(&outcome?);
    }
    let report = SimulationReport {
        channel: channel.to_string(),
        count,
        elapsed_ms: millis(started.elapsed()),
        outcomes: counts,
        stats: router.stats(),
    };

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Pretty => {
            let o = &report.outcomes;
            println!(
                "{} sends over `{}` in {}ms",
                report.count, report.channel, report.elapsed_ms
            );
            println!(
                "delivered {} | rejected {} | timeout {} | transport_error {} | rate_limited {}",
                o.delivered, o.rejected, o.timeout, o.transport_error, o.rate_limited
            );
            for (provider, attempts) in &report.stats.provider_attempts {
                println!("  {provider}: {attempts} attempts");
            }
        }
    }
    Ok(())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
