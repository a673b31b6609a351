//! Router construction and call-contract errors.
//!
//! Delivery failures are never reported through this type; they are
//! [`Outcome::Failure`](crate::Outcome) values. A `RouterError` means the
//! router was misconfigured or misused.

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, RouterError>;

/// Errors raised by router construction or by a malformed call.
#[derive(Debug, Error)]
pub enum RouterError {
    /// `send` named a channel the router was not built with.
    #[error("unknown channel `{channel}`")]
    UnknownChannel { channel: String },

    /// A channel lists a provider identity absent from the registry.
    #[error("channel `{channel}` references unknown provider `{provider}`")]
    UnknownProvider { channel: String, provider: String },

    /// A provider definition could not be turned into a provider.
    #[error("invalid provider `{provider}`: {reason}")]
    InvalidProvider { provider: String, reason: String },

    /// Configuration values out of range or inconsistent.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// Configuration file is not valid TOML for the router schema.
    #[error("failed to parse configuration: {source}")]
    Parse {
        #[from]
        source: toml::de::Error,
    },

    /// Configuration file could not be read.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// The caller cancelled the send before it finished.
    #[error("send cancelled")]
    Cancelled,
}

impl RouterError {
    pub fn unknown_channel(channel: impl Into<String>) -> Self {
        Self::UnknownChannel {
            channel: channel.into(),
        }
    }

    pub fn unknown_provider(channel: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::UnknownProvider {
            channel: channel.into(),
            provider: provider.into(),
        }
    }

    pub fn invalid_provider(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProvider {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether the error was raised while building the router rather than by a call.
    pub fn is_construction_error(&self) -> bool {
        !matches!(self, Self::UnknownChannel { .. } | Self::Cancelled)
    }
}
