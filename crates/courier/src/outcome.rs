//! Attempt outcomes and routing records.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::message::ProviderId;

/// Classified reason of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Permanent: the provider says this request can never succeed as given.
    Rejected,
    /// The attempt did not finish within its time budget.
    Timeout,
    /// Vendor or network failure, presumed transient.
    TransportError,
    /// The local admission gate declined before any provider was contacted.
    RateLimited,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
            Self::TransportError => "transport_error",
            Self::RateLimited => "rate_limited",
        }
    }

    /// Whether retrying the same provider may help.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::TransportError)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof of acceptance returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub provider: ProviderId,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    /// Provider the failure came from. `None` when no provider was involved.
    pub provider: Option<ProviderId>,
    pub detail: String,
}

impl Failure {
    pub fn new(kind: FailureKind, provider: Option<ProviderId>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            provider,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.provider {
            Some(provider) => write!(f, "{} via {}: {}", self.kind, provider, self.detail),
            None => write!(f, "{}: {}", self.kind, self.detail),
        }
    }
}

/// Result of one attempt, or of a whole send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success(Receipt),
    Failure(Failure),
}

impl Outcome {
    pub fn success(provider: ProviderId, receipt_id: impl Into<String>) -> Self {
        Self::Success(Receipt {
            provider,
            id: receipt_id.into(),
        })
    }

    pub fn failure(kind: FailureKind, provider: Option<ProviderId>, detail: impl Into<String>) -> Self {
        Self::Failure(Failure::new(kind, provider, detail))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn receipt(&self) -> Option<&Receipt> {
        match self {
            Self::Success(receipt) => Some(receipt),
            Self::Failure(_) => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(failure.kind),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(receipt) => write!(f, "delivered via {} ({})", receipt.provider, receipt.id),
            Self::Failure(failure) => write!(f, "failed: {failure}"),
        }
    }
}

/// Why a provider was put in the attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteRole {
    Primary,
    Experiment,
    Fallback,
}

impl RouteRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Experiment => "experiment",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for RouteRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub provider: ProviderId,
    pub role: RouteRole,
}

/// One provider contact (or one gate refusal) made while serving a send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub provider: ProviderId,
    pub role: RouteRole,
    /// 1-based attempt number on this provider.
    pub attempt: u32,
    pub outcome: Outcome,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl AttemptRecord {
    /// Whether the provider was actually called for this attempt.
    pub fn contacted_provider(&self) -> bool {
        self.outcome.failure_kind() != Some(FailureKind::RateLimited)
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
