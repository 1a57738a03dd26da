use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

use skybot_db::Database;
use skybot_types::{
    ChatMessage, DialogEntry, Event, FamiliarityTier, FortuneRecord, Mode, Role, UserEconomy,
};

/// Per-author economy, fortune log and dialog history.
///
/// All reads and writes go straight to storage; the main loop is the only
/// writer, so every mutation is visible to the next Event it processes.
#[derive(Clone)]
pub struct EconomyStore {
    db: Arc<Database>,
}

impl EconomyStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get_or_create(&self, did: &str, now: DateTime<Utc>) -> Result<UserEconomy> {
        self.db.get_or_create_economy(did, now)
    }

    /// Overwrite the author's mutable fields.
    pub fn update(&self, economy: &UserEconomy) -> Result<()> {
        self.db.save_economy(economy)
    }

    /// Atomic read-modify-write. Nothing is stored when `f` fails.
    pub fn modify<T>(
        &self,
        did: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut UserEconomy) -> Result<T>,
    ) -> Result<T> {
        self.db.update_economy(did, now, f)
    }

    pub fn credit(&self, did: &str, amount: u32, now: DateTime<Utc>) -> Result<UserEconomy> {
        self.modify(did, now, |economy| {
            economy.credit(amount);
            Ok(economy.clone())
        })
    }

    /// Spend points; fails without writing when the balance is short.
    pub fn debit(&self, did: &str, amount: u32, now: DateTime<Utc>) -> Result<UserEconomy> {
        self.modify(did, now, |economy| {
            economy.debit(amount)?;
            Ok(economy.clone())
        })
    }

    pub fn set_mode(&self, did: &str, mode: Mode, now: DateTime<Utc>) -> Result<UserEconomy> {
        self.modify(did, now, |economy| {
            economy.mode = mode;
            Ok(economy.clone())
        })
    }

    /// Log a fortune for the Event's author, stamped with the Event time.
    pub fn record_fortune(&self, event: &Event) -> Result<()> {
        self.db.insert_fortune(&FortuneRecord {
            did: event.author_id.clone(),
            handle: event.author_handle.clone(),
            display_name: event.author_display_name.clone(),
            created_at: event.created_at,
        })
    }

    pub fn latest_fortune(&self, did: &str) -> Result<Option<FortuneRecord>> {
        self.db.latest_fortune(did)
    }

    pub fn familiarity_tier(&self, did: &str) -> Result<FamiliarityTier> {
        let fortunes = self.db.fortune_count(did)?;
        let lifetime = self
            .db
            .get_economy(did)?
            .map(|e| u64::from(e.all_points))
            .unwrap_or(0);
        Ok(FamiliarityTier::from_score(fortunes.max(lifetime)))
    }

    /// Most recent `window` dialog turns, oldest first.
    pub fn dialog_context(&self, did: &str, window: u32) -> Result<Vec<ChatMessage>> {
        let entries = self.db.recent_dialog(did, window)?;
        Ok(entries.iter().map(ChatMessage::from).collect())
    }

    pub fn append_dialog(
        &self,
        did: &str,
        role: Role,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.db.insert_dialog(&DialogEntry {
            did: did.to_string(),
            role,
            message: message.to_string(),
            created_at: at,
        })
    }
}
