//! Raw feed and notification payloads -> `Event`.
//!
//! Fails closed: an item missing a required field is dropped and logged,
//! never propagated into the decision pipeline.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use skybot_types::api::{
    FeedViewPost, MENTION_FEATURE, NotificationPage, NotificationView, PostRecord, ProfileView,
    TimelinePage,
};
use skybot_types::{Event, PostRef, Reason, Relationship, StreamKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("unparseable timestamp '{0}'")]
    BadTimestamp(String),

    #[error("unsupported notification reason '{0}'")]
    UnsupportedReason(String),
}

pub fn normalize_timeline(page: &TimelinePage) -> Vec<Event> {
    page.feed.iter().filter_map(normalize_feed_item).collect()
}

pub fn normalize_notifications(page: &NotificationPage) -> Vec<Event> {
    page.notifications.iter().filter_map(normalize_notification).collect()
}

pub fn normalize_feed_item(item: &FeedViewPost) -> Option<Event> {
    match feed_item_event(item) {
        Ok(event) => Some(event),
        Err(e) => {
            let uri = item.post.as_ref().and_then(|p| p.uri.as_deref()).unwrap_or("?");
            warn!(stream = "timeline", uri, "Dropping feed item: {}", e);
            None
        }
    }
}

pub fn normalize_notification(item: &NotificationView) -> Option<Event> {
    match notification_event(item) {
        Ok(event) => Some(event),
        Err(e @ NormalizeError::UnsupportedReason(_)) => {
            debug!(stream = "notification", "Ignoring notification: {}", e);
            None
        }
        Err(e) => {
            let uri = item.uri.as_deref().unwrap_or("?");
            warn!(stream = "notification", uri, "Dropping notification: {}", e);
            None
        }
    }
}

fn feed_item_event(item: &FeedViewPost) -> Result<Event, NormalizeError> {
    let post = item.post.as_ref().ok_or(NormalizeError::MissingField("post"))?;
    let uri = required(&post.uri, "post.uri")?;
    let cid = required(&post.cid, "post.cid")?;
    let author = post.author.as_ref().ok_or(NormalizeError::MissingField("post.author"))?;
    let record = post.record.as_ref().ok_or(NormalizeError::MissingField("post.record"))?;
    let text = required(&record.text, "post.record.text")?;
    let created_at = parse_time(required(&post.indexed_at, "post.indexedAt")?)?;

    let reason = if item.reason.is_some() {
        Reason::Repost
    } else if record.reply.is_some() {
        Reason::Reply
    } else {
        Reason::None
    };

    build_event(
        uri,
        cid,
        author,
        record,
        text,
        created_at,
        reason,
        StreamKind::Timeline,
    )
}

fn notification_event(item: &NotificationView) -> Result<Event, NormalizeError> {
    let raw_reason = required(&item.reason, "reason")?;
    let reason = Reason::from_notification(raw_reason)
        .ok_or_else(|| NormalizeError::UnsupportedReason(raw_reason.to_string()))?;

    let uri = required(&item.uri, "uri")?;
    let cid = required(&item.cid, "cid")?;
    let author = item.author.as_ref().ok_or(NormalizeError::MissingField("author"))?;
    let created_at = parse_time(required(&item.indexed_at, "indexedAt")?)?;

    let empty = PostRecord::default();
    let record = item.record.as_ref().unwrap_or(&empty);
    // Likes, reposts and follows carry no text worth answering.
    let text = if reason.is_conversational() {
        required(&record.text, "record.text")?
    } else {
        ""
    };

    build_event(
        uri,
        cid,
        author,
        record,
        text,
        created_at,
        reason,
        StreamKind::Notification,
    )
}

#[allow(clippy::too_many_arguments)]
fn build_event(
    uri: &str,
    cid: &str,
    author: &ProfileView,
    record: &PostRecord,
    text: &str,
    created_at: DateTime<Utc>,
    reason: Reason,
    source: StreamKind,
) -> Result<Event, NormalizeError> {
    let author_id = required(&author.did, "author.did")?;
    let author_handle = required(&author.handle, "author.handle")?;

    Ok(Event {
        id: uri.to_string(),
        cid: cid.to_string(),
        author_id: author_id.to_string(),
        author_handle: author_handle.to_string(),
        author_display_name: author.display_name.clone().unwrap_or_default(),
        text: text.to_string(),
        created_at,
        root_ref: record.reply.as_ref().map(|r| r.root.clone()),
        parent_ref: record.reply.as_ref().map(|r| r.parent.clone()),
        mentioned_ids: mention_dids(record),
        reason,
        source,
        relationship: Relationship {
            muted: author.viewer.muted,
            blocked_by: author.viewer.blocked_by,
            followed_by: author.viewer.followed_by.is_some(),
            following: author.viewer.following.is_some(),
        },
    })
}

/// DIDs named by rich-text mention facets.
fn mention_dids(record: &PostRecord) -> BTreeSet<String> {
    record
        .facets
        .iter()
        .flat_map(|facet| facet.features.iter())
        .filter(|feature| feature.kind.as_deref() == Some(MENTION_FEATURE))
        .filter_map(|feature| feature.did.clone())
        .collect()
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, NormalizeError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty() || field.ends_with("text"))
        .ok_or(NormalizeError::MissingField(field))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, NormalizeError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| NormalizeError::BadTimestamp(raw.to_string()))
}

/// Reply reference for a post we are answering.
pub fn reply_target(event: &Event) -> (PostRef, PostRef) {
    let parent = event.post_ref();
    let root = event.root_ref.clone().unwrap_or_else(|| parent.clone());
    (root, parent)
}
