//! Router configuration.
//!
//! Read once when the router is built; a different configuration means a
//! different router.
//!
//! ```toml
//! [admission]
//! scope = "shared"        # or "per_channel" (default)
//! per_second = 200
//!
//! [channels.sms]
//! primary = "vendor_a"
//! fallbacks = ["vendor_b"]
//! max_attempts = 2
//! timeout_ms = 3000
//! experiment = { provider = "vendor_c", weight = 0.1 }
//!
//! [providers.vendor_a]
//! type = "webhook"
//! url = "https://sms-gateway.internal/vendor-a"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};
use crate::message::ProviderId;
use crate::provider::ProviderSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub admission: AdmissionScope,
    pub channels: BTreeMap<String, ChannelConfig>,
    /// Provider definitions, used when the registry is built from this file.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSpec>,
}

/// Which admission gate an attempt is counted against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum AdmissionScope {
    /// One gate per channel, sized by the channel's `admission_per_second`.
    #[default]
    PerChannel,
    /// One gate for the whole router.
    Shared { per_second: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub provider: ProviderId,
    /// Fraction of traffic sent to `provider` first, within `[0, 1]`.
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub primary: ProviderId,
    /// Providers tried after the primary, in priority order.
    #[serde(default)]
    pub fallbacks: Vec<ProviderId>,
    #[serde(default)]
    pub experiment: Option<ExperimentConfig>,
    /// Attempts per provider before moving on.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Budget of a single attempt.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Pause between attempts on the same provider.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Attempt ceiling per rolling second (per-channel admission only).
    #[serde(default = "default_admission_per_second")]
    pub admission_per_second: u32,
}

fn default_max_attempts() -> u32 {
    2
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_backoff_ms() -> u64 {
    200
}

fn default_admission_per_second() -> u32 {
    100
}

impl ChannelConfig {
    pub fn new(primary: impl Into<ProviderId>) -> Self {
        Self {
            primary: primary.into(),
            fallbacks: Vec::new(),
            experiment: None,
            max_attempts: default_max_attempts(),
            timeout_ms: default_timeout_ms(),
            backoff_ms: default_backoff_ms(),
            admission_per_second: default_admission_per_second(),
        }
    }

    pub fn with_fallbacks<I, P>(mut self, fallbacks: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ProviderId>,
    {
        self.fallbacks = fallbacks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_experiment(mut self, provider: impl Into<ProviderId>, weight: f64) -> Self {
        self.experiment = Some(ExperimentConfig {
            provider: provider.into(),
            weight,
        });
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_admission_per_second(mut self, ceiling: u32) -> Self {
        self.admission_per_second = ceiling;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Every provider identity the channel may contact.
    pub fn referenced_providers(&self) -> impl Iterator<Item = &ProviderId> {
        std::iter::once(&self.primary)
            .chain(self.fallbacks.iter())
            .chain(self.experiment.iter().map(|e| &e.provider))
    }

    fn validate(&self, name: &str, scope: &AdmissionScope) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(RouterError::config(format!(
                "channel `{name}`: max_attempts must be at least 1"
            )));
        }
        if self.timeout_ms == 0 {
            return Err(RouterError::config(format!(
                "channel `{name}`: timeout_ms must be greater than 0"
            )));
        }
        if let Some(experiment) = &self.experiment {
            if !experiment.weight.is_finite() || !(0.0..=1.0).contains(&experiment.weight) {
                return Err(RouterError::config(format!(
                    "channel `{name}`: experiment weight must be within [0, 1], got {}",
                    experiment.weight
                )));
            }
        }
        if *scope == AdmissionScope::PerChannel && self.admission_per_second == 0 {
            return Err(RouterError::config(format!(
                "channel `{name}`: admission_per_second must be greater than 0"
            )));
        }
        Ok(())
    }
}

impl RouterConfig {
    pub fn new(admission: AdmissionScope) -> Self {
        Self {
            admission,
            channels: BTreeMap::new(),
            providers: BTreeMap::new(),
        }
    }

    pub fn with_channel(mut self, name: impl Into<String>, channel: ChannelConfig) -> Self {
        self.channels.insert(name.into(), channel);
        self
    }

    pub fn with_provider(mut self, name: impl Into<String>, spec: ProviderSpec) -> Self {
        self.providers.insert(name.into(), spec);
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let input = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(RouterError::config("at least one channel must be configured"));
        }
        if let AdmissionScope::Shared { per_second: 0 } = self.admission {
            return Err(RouterError::config(
                "shared admission per_second must be greater than 0",
            ));
        }
        for (name, channel) in &self.channels {
            channel.validate(name, &self.admission)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [admission]
        scope = "shared"
        per_second = 50

        [channels.sms]
        primary = "vendor_a"
        fallbacks = ["vendor_b"]
        max_attempts = 3
        timeout_ms = 1500
        experiment = { provider = "vendor_c", weight = 0.2 }

        [channels.email]
        primary = "mailer"

        [providers.vendor_a]
        type = "console"

        [providers.mailer]
        type = "webhook"
        url = "https://mail.internal/send"
    "#;

    #[test]
    fn parses_full_document() {
        let config = RouterConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.admission, AdmissionScope::Shared { per_second: 50 });
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.providers.len(), 2);

        let sms = &config.channels["sms"];
        assert_eq!(sms.primary.as_str(), "vendor_a");
        assert_eq!(sms.fallbacks, vec![ProviderId::new("vendor_b")]);
        assert_eq!(sms.max_attempts, 3);
        assert_eq!(sms.timeout(), Duration::from_millis(1500));
        let experiment = sms.experiment.as_ref().unwrap();
        assert_eq!(experiment.provider.as_str(), "vendor_c");
        assert_eq!(experiment.weight, 0.2);

        assert_eq!(config.providers["mailer"].provider_type(), "webhook");
    }

    #[test]
    fn channel_defaults_apply() {
        let config = RouterConfig::from_toml_str(
            r#"
            [channels.email]
            primary = "mailer"
            "#,
        )
        .unwrap();
        assert_eq!(config.admission, AdmissionScope::PerChannel);
        let email = &config.channels["email"];
        assert_eq!(email, &ChannelConfig::new("mailer"));
        assert_eq!(email.max_attempts, 2);
        assert_eq!(email.timeout_ms, 5000);
        assert_eq!(email.backoff_ms, 200);
        assert_eq!(email.admission_per_second, 100);
        assert!(email.fallbacks.is_empty());
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            ChannelConfig::new("a").with_max_attempts(0),
            ChannelConfig::new("a").with_timeout(Duration::ZERO),
            ChannelConfig::new("a").with_experiment("b", 1.5),
            ChannelConfig::new("a").with_experiment("b", -0.1),
            ChannelConfig::new("a").with_experiment("b", f64::NAN),
            ChannelConfig::new("a").with_admission_per_second(0),
        ];
        for channel in cases {
            let config = RouterConfig::new(AdmissionScope::PerChannel).with_channel("sms", channel);
            let err = config.validate().unwrap_err();
            assert!(matches!(err, RouterError::Configuration { .. }), "{err}");
        }
    }

    #[test]
    fn shared_scope_ignores_channel_ceiling_but_needs_its_own() {
        let channel = ChannelConfig::new("a").with_admission_per_second(0);
        let config =
            RouterConfig::new(AdmissionScope::Shared { per_second: 10 }).with_channel("sms", channel);
        assert!(config.validate().is_ok());

        let config = RouterConfig::new(AdmissionScope::Shared { per_second: 0 })
            .with_channel("sms", ChannelConfig::new("a"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_channel_set_is_rejected() {
        let config = RouterConfig::new(AdmissionScope::PerChannel);
        assert!(config.validate().is_err());
        assert!(RouterConfig::from_toml_str("channels = {}").is_err());
    }

    #[test]
    fn parse_errors_surface_as_parse_variant() {
        let err = RouterConfig::from_toml_str("[channels.sms]\nprimary = 5").unwrap_err();
        assert!(matches!(err, RouterError::Parse { .. }));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = RouterConfig::load(&path).unwrap();
        assert_eq!(config.channels.len(), 2);

        let err = RouterConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, RouterError::Io { .. }));
    }

    #[test]
    fn referenced_providers_lists_every_slot() {
        let channel = ChannelConfig::new("a")
            .with_fallbacks(["b", "c"])
            .with_experiment("d", 0.5);
        let ids: Vec<_> = channel.referenced_providers().map(|p| p.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }
}
