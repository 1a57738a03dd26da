use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use skybot_db::Database;
use skybot_types::{Event, Reason, StreamKind};

/// Durable per-stream watermark.
///
/// Values are cached after the first read; the cache only ever moves
/// forward, mirroring the conditional update in storage.
pub struct CursorTracker {
    db: Arc<Database>,
    cache: HashMap<StreamKind, DateTime<Utc>>,
}

impl CursorTracker {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            cache: HashMap::new(),
        }
    }

    /// Current watermark. A stream seen for the first time starts at `now`,
    /// so history from before the first run is never answered.
    pub fn watermark(&mut self, stream: StreamKind, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if let Some(at) = self.cache.get(&stream) {
            return Ok(*at);
        }
        let cursor = match self.db.get_stream_cursor(stream)? {
            Some(cursor) => cursor,
            None => {
                info!(%stream, at = %now, "Initialising stream watermark");
                self.db.init_stream_cursor(stream, now)?
            }
        };
        self.cache.insert(stream, cursor.last_processed_at);
        Ok(cursor.last_processed_at)
    }

    /// Move the watermark forward. Regressions are ignored; returns whether
    /// the stored value changed.
    pub fn advance(&mut self, stream: StreamKind, at: DateTime<Utc>) -> Result<bool> {
        let moved = self.db.advance_stream_cursor(stream, at)?;
        if moved {
            self.cache.insert(stream, at);
        } else {
            debug!(%stream, at = %at, "Watermark not advanced");
        }
        Ok(moved)
    }

    pub fn record_page_cursor(&self, stream: StreamKind, cursor: Option<&str>) -> Result<()> {
        self.db.set_page_cursor(stream, cursor)
    }
}

/// Whether a fetched page goes back as far as `watermark`. Reposts carry the
/// reposted post's time, which says nothing about how far back the page is.
pub fn reaches_watermark(events: &[Event], watermark: DateTime<Utc>) -> bool {
    events
        .iter()
        .any(|e| e.reason != Reason::Repost && e.created_at <= watermark)
}

/// Events strictly newer than `watermark`, oldest first, each id once.
pub fn select_new(mut events: Vec<Event>, watermark: DateTime<Utc>) -> Vec<Event> {
    events.retain(|e| e.created_at > watermark);
    events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    events.dedup_by(|a, b| a.id == b.id);
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use skybot_types::Relationship;
    use std::collections::BTreeSet;

    fn tracker() -> (Arc<Database>, CursorTracker) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (db.clone(), CursorTracker::new(db))
    }

    fn event(id: &str, at: DateTime<Utc>) -> Event {
        Event {
            id: id.into(),
            cid: "c".into(),
            author_id: "did:plc:a".into(),
            author_handle: "a.test".into(),
            author_display_name: String::new(),
            text: String::new(),
            created_at: at,
            root_ref: None,
            parent_ref: None,
            mentioned_ids: BTreeSet::new(),
            reason: Reason::None,
            source: StreamKind::Timeline,
            relationship: Relationship::default(),
        }
    }

    #[test]
    fn first_run_starts_at_now() {
        let (_db, mut cursors) = tracker();
        let now = Utc::now();
        assert_eq!(cursors.watermark(StreamKind::Timeline, now).unwrap(), now);
        let later = now + TimeDelta::hours(1);
        assert_eq!(cursors.watermark(StreamKind::Timeline, later).unwrap(), now);
    }

    #[test]
    fn advance_never_regresses() {
        let (db, mut cursors) = tracker();
        let t0 = Utc::now();
        cursors.watermark(StreamKind::Notification, t0).unwrap();

        assert!(cursors.advance(StreamKind::Notification, t0 + TimeDelta::seconds(5)).unwrap());
        assert!(!cursors.advance(StreamKind::Notification, t0 + TimeDelta::seconds(1)).unwrap());

        let stored = db.get_stream_cursor(StreamKind::Notification).unwrap().unwrap();
        assert_eq!(stored.last_processed_at, t0 + TimeDelta::seconds(5));
    }

    #[test]
    fn watermark_survives_a_restart() {
        let (db, mut cursors) = tracker();
        let t0 = Utc::now() - TimeDelta::hours(2);
        cursors.watermark(StreamKind::Timeline, t0).unwrap();
        cursors.advance(StreamKind::Timeline, t0 + TimeDelta::minutes(3)).unwrap();

        let mut restarted = CursorTracker::new(db);
        assert_eq!(
            restarted.watermark(StreamKind::Timeline, Utc::now()).unwrap(),
            t0 + TimeDelta::minutes(3)
        );
    }

    #[test]
    fn old_reposts_do_not_end_paging() {
        let t0 = Utc::now();
        let mut repost = event("r", t0 - TimeDelta::days(30));
        repost.reason = Reason::Repost;
        let fresh = event("f", t0 + TimeDelta::seconds(10));

        assert!(!reaches_watermark(&[fresh.clone(), repost], t0));
        assert!(reaches_watermark(&[fresh, event("o", t0)], t0));
    }

    #[test]
    fn selection_is_strict_ordered_and_unique() {
        let t0 = Utc::now();
        let events = vec![
            event("c", t0 + TimeDelta::seconds(3)),
            event("old", t0),
            event("a", t0 + TimeDelta::seconds(1)),
            event("c", t0 + TimeDelta::seconds(3)),
        ];
        let ids: Vec<_> = select_new(events, t0).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
