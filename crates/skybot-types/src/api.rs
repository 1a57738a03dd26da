use serde::{Deserialize, Serialize};

use crate::events::PostRef;

// -- Inbound: app.bsky.feed.getTimeline --
//
// Every field is optional on the way in; the Normalizer decides what is
// required and drops items that lack it.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimelinePage {
    #[serde(default)]
    pub feed: Vec<FeedViewPost>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedViewPost {
    pub post: Option<PostView>,
    /// Present for reposts and pins.
    pub reason: Option<FeedReason>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedReason {
    #[serde(rename = "$type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: Option<String>,
    pub cid: Option<String>,
    pub author: Option<ProfileView>,
    pub record: Option<PostRecord>,
    pub indexed_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub did: Option<String>,
    pub handle: Option<String>,
    pub display_name: Option<String>,
    #[serde(default)]
    pub viewer: ViewerState,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerState {
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub blocked_by: bool,
    /// URI of the bot's follow record for this author.
    pub following: Option<String>,
    /// URI of the author's follow record for the bot.
    pub followed_by: Option<String>,
}

/// `app.bsky.feed.post` record. Follow records deserialize into this too,
/// with every post field absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub text: Option<String>,
    pub created_at: Option<String>,
    pub reply: Option<ReplyRef>,
    #[serde(default)]
    pub facets: Vec<Facet>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Facet {
    #[serde(default)]
    pub features: Vec<FacetFeature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FacetFeature {
    #[serde(rename = "$type")]
    pub kind: Option<String>,
    pub did: Option<String>,
}

pub const MENTION_FEATURE: &str = "app.bsky.richtext.facet#mention";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub root: PostRef,
    pub parent: PostRef,
}

// -- Inbound: app.bsky.notification.listNotifications --

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationPage {
    #[serde(default)]
    pub notifications: Vec<NotificationView>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub uri: Option<String>,
    pub cid: Option<String>,
    pub author: Option<ProfileView>,
    pub reason: Option<String>,
    pub record: Option<PostRecord>,
    pub indexed_at: Option<String>,
    #[serde(default)]
    pub is_read: bool,
}

// -- Outbound --

/// Blob handle returned by `com.atproto.repo.uploadBlob`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    #[serde(rename = "$type", default = "blob_type")]
    pub kind: String,
    #[serde(rename = "ref")]
    pub link: CidLink,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub size: u64,
}

fn blob_type() -> String {
    "blob".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidLink {
    #[serde(rename = "$link")]
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub blob: BlobRef,
    pub alt: String,
}

/// A post the engine wants published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDraft {
    pub text: String,
    pub reply: Option<ReplyRef>,
    pub image: Option<ImageAttachment>,
}

impl PostDraft {
    pub fn standalone(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reply: None,
            image: None,
        }
    }
}

/// Identity of the logged-in bot account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub did: String,
    pub handle: String,
}
