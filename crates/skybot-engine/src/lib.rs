//! Interaction decision engine.
//!
//! Polls the timeline and notification streams, filters and classifies each
//! Event, applies the per-author point economy and reply throttle, and
//! advances a per-stream watermark once an Event's effects are stored.
//! Outbound network calls all go through one retrying `Dispatcher`.

pub mod aggregate;
pub mod classifier;
pub mod client;
pub mod config;
pub mod cursor;
pub mod dedup;
pub mod dispatcher;
pub mod economy;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod normalizer;
pub mod templates;
pub mod throttle;

pub use aggregate::Aggregator;
pub use classifier::{Addressing, Intent, classify};
pub use client::{CompletionClient, DirectorySource, ImageRenderer, SocialClient};
pub use config::EngineConfig;
pub use dispatcher::{Dispatcher, RetryPolicy, SessionKeeper, SessionPolicy};
pub use engine::{Engine, EngineContext, Handled};
pub use error::{DispatchError, EngineError};
