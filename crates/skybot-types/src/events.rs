use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The feed an Event was polled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Timeline,
    Notification,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::Notification, StreamKind::Timeline];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeline => "timeline",
            Self::Notification => "notification",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an item surfaced in its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// Plain timeline post.
    None,
    Reply,
    Mention,
    Quote,
    Repost,
    Like,
    Follow,
}

impl Reason {
    /// Maps a notification `reason` string. Unknown reasons return `None`
    /// so the Normalizer can drop them.
    pub fn from_notification(reason: &str) -> Option<Self> {
        match reason {
            "reply" => Some(Self::Reply),
            "mention" => Some(Self::Mention),
            "quote" => Some(Self::Quote),
            "repost" => Some(Self::Repost),
            "like" => Some(Self::Like),
            "follow" => Some(Self::Follow),
            _ => None,
        }
    }

    /// Whether an item with this reason carries text someone could be answered on.
    pub fn is_conversational(&self) -> bool {
        matches!(self, Self::None | Self::Reply | Self::Mention | Self::Quote)
    }
}

/// Strong reference to a record: `at://` URI plus content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostRef {
    pub uri: String,
    pub cid: String,
}

impl PostRef {
    pub fn new(uri: impl Into<String>, cid: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            cid: cid.into(),
        }
    }

    /// DID of the repository that owns this record.
    pub fn author_did(&self) -> Option<&str> {
        did_from_at_uri(&self.uri)
    }
}

/// Extract the DID authority from `at://did:plc:xyz/collection/rkey`.
pub fn did_from_at_uri(uri: &str) -> Option<&str> {
    let rest = uri.strip_prefix("at://")?;
    let authority = rest.split('/').next()?;
    authority.starts_with("did:").then_some(authority)
}

/// Viewer flags describing how the author relates to the bot account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub muted: bool,
    pub blocked_by: bool,
    /// The author follows the bot.
    pub followed_by: bool,
    /// The bot follows the author.
    pub following: bool,
}

/// Immutable snapshot of one feed or notification item.
///
/// `created_at` is the server index time and is the ordering key for the
/// stream watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub cid: String,
    pub author_id: String,
    pub author_handle: String,
    pub author_display_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub root_ref: Option<PostRef>,
    pub parent_ref: Option<PostRef>,
    pub mentioned_ids: BTreeSet<String>,
    pub reason: Reason,
    pub source: StreamKind,
    pub relationship: Relationship,
}

impl Event {
    pub fn post_ref(&self) -> PostRef {
        PostRef::new(self.id.clone(), self.cid.clone())
    }

    pub fn is_reply(&self) -> bool {
        self.parent_ref.is_some()
    }

    /// Author of the post this Event replies to, if it is a reply.
    pub fn parent_author_id(&self) -> Option<&str> {
        self.parent_ref.as_ref().and_then(PostRef::author_did)
    }
}
