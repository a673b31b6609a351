//! Provider-agnostic message delivery.
//!
//! A [`NotificationRouter`] sends a message over a named channel. Each channel
//! has a primary provider, ordered fallbacks and an optional experiment
//! provider that receives a weighted share of traffic. Every attempt passes
//! an [`AdmissionGate`] and runs under a timeout; transient failures are
//! retried with a fixed backoff before the next provider is tried.
//!
//! ```no_run
//! use courier_engine::{Destination, NotificationRouter, Payload, RouterConfig};
//!
//! # async fn run() -> courier_engine::Result<()> {
//! let config = RouterConfig::load("courier.toml")?;
//! let router = NotificationRouter::from_config(config)?;
//! let outcome = router
//!     .send(&Destination::new("+15550100"), &Payload::text("hello"), "sms")
//!     .await?;
//! println!("{outcome}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod gate;
pub mod message;
pub mod observer;
pub mod outcome;
pub mod policy;
pub mod provider;
pub mod router;
pub mod splitter;
mod stats;
pub mod time;

pub use config::{AdmissionScope, ChannelConfig, ExperimentConfig, RouterConfig};
pub use error::{Result, RouterError};
pub use executor::AttemptExecutor;
pub use gate::AdmissionGate;
pub use message::{Destination, Payload, ProviderId};
pub use observer::{BroadcastSink, DeliveryRecord, DeliverySink, NoopSink, TracingSink};
pub use outcome::{AttemptRecord, Failure, FailureKind, Outcome, Receipt, RouteDecision, RouteRole};
pub use policy::{FallbackPolicy, PolicyRun, RouteStep};
pub use provider::{Provider, ProviderError, ProviderRegistry, ProviderSpec};
pub use router::{NotificationRouter, RouterBuilder};
pub use splitter::{RandomSource, SequenceRandom, ThreadRandom, TrafficSplitter};
pub use stats::RouterStats;
pub use time::{Clock, ManualClock, RecordingSleeper, Sleeper, TokioClock, TokioSleeper};
