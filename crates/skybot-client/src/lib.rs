//! Network clients behind the engine's collaborator traits.
//!
//! - `atproto`: XRPC session, feeds, posting and blob upload
//! - `completion`: OpenAI-compatible chat completions
//! - `plc`: PLC directory export for the aggregation loop

pub mod atproto;
pub mod completion;
mod http;
pub mod plc;

pub use atproto::BskyClient;
pub use completion::OpenAiCompletion;
pub use plc::PlcDirectory;
