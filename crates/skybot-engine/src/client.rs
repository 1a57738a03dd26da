//! Collaborator seams. The binary wires real network clients in; tests
//! use in-memory fakes.

use async_trait::async_trait;

use skybot_types::api::{BlobRef, NotificationPage, PostDraft, SessionInfo, TimelinePage};
use skybot_types::{ChatMessage, ClientError, DirectoryUser, PostRef};

#[async_trait]
pub trait SocialClient: Send + Sync {
    /// Create a fresh session and return the bot identity.
    async fn login(&self) -> Result<SessionInfo, ClientError>;

    async fn timeline(&self, cursor: Option<&str>, limit: u32) -> Result<TimelinePage, ClientError>;

    async fn notifications(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<NotificationPage, ClientError>;

    async fn create_post(&self, draft: &PostDraft) -> Result<PostRef, ClientError>;

    async fn upload_image(&self, png: &[u8]) -> Result<BlobRef, ClientError>;

    async fn follow(&self, did: &str) -> Result<(), ClientError>;
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Generate a reply to `user` given a system prompt and prior turns.
    async fn complete(
        &self,
        system: &str,
        history: &[ChatMessage],
        user: &str,
    ) -> Result<String, ClientError>;
}

/// SVG to PNG rasterizer. Blocking; the engine calls it off the async runtime.
pub trait ImageRenderer: Send + Sync {
    fn render_png(&self, svg: &str) -> anyhow::Result<Vec<u8>>;
}

/// Source of account-creation records for the aggregation loop.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    /// Accounts created after the `after` export timestamp, oldest first.
    async fn export_after(&self, after: Option<&str>) -> Result<Vec<DirectoryUser>, ClientError>;
}
