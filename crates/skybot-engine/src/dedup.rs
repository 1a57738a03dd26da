//! Cross-stream dedup.
//!
//! The same post can surface on the timeline and as a notification. Each
//! stream owns a disjoint class of decisions: anything that raises a
//! notification belongs to the notification path, the timeline only
//! handles ambient posts and plain-text name calls. A bounded TTL set of
//! answered ids backs the partition up.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use skybot_types::StreamKind;

use crate::classifier::Addressing;

/// Which path decides an Event.
pub fn owned_by(addressing: Addressing) -> StreamKind {
    match addressing {
        Addressing::Notified => StreamKind::Notification,
        Addressing::Named | Addressing::Ambient => StreamKind::Timeline,
    }
}

/// Whether the stream an Event arrived on should act on it.
pub fn should_handle(source: StreamKind, addressing: Addressing) -> bool {
    owned_by(addressing) == source
}

/// Ids of Events already answered, forgotten after `ttl` or once
/// `capacity` newer ids have been recorded.
pub struct ProcessedSet {
    ttl: Duration,
    capacity: usize,
    seen: HashMap<String, Instant>,
    order: VecDeque<(String, Instant)>,
}

impl ProcessedSet {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn contains(&mut self, id: &str) -> bool {
        self.evict(Instant::now());
        self.seen.contains_key(id)
    }

    /// Record an id. Returns false if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        let now = Instant::now();
        self.evict(now);
        if self.seen.contains_key(id) {
            return false;
        }
        self.seen.insert(id.to_string(), now);
        self.order.push_back((id.to_string(), now));
        while self.order.len() > self.capacity {
            if let Some((old, _)) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn evict(&mut self, now: Instant) {
        while let Some((id, at)) = self.order.front() {
            if now.duration_since(*at) < self.ttl {
                break;
            }
            self.seen.remove(id);
            self.order.pop_front();
        }
    }
}
