/// Shared types for the skybot workspace.
///
/// `events` holds the normalized Event the decision engine reasons about,
/// `models` the persisted economy records, `api` the social-network wire
/// payloads, and `error` the collaborator error taxonomy.
pub mod api;
pub mod error;
pub mod events;
pub mod models;

pub use error::ClientError;
pub use events::{Event, PostRef, Reason, Relationship, StreamKind};
pub use models::{
    ChatMessage, CommandOutcome, DialogEntry, DirectoryUser, FamiliarityTier, FortuneRecord,
    InsufficientPoints, Mode, Role, StreamCursor, UserEconomy,
};
