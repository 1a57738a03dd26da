use std::time::Duration;

use chrono::TimeDelta;

use crate::dispatcher::{RetryPolicy, SessionPolicy};

/// Tunables for the decision engine. Built by the binary from the
/// environment; the engine never reads the environment itself.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Nicknames that count as addressing the bot when they appear in text.
    pub bot_names: Vec<String>,
    /// Persona prompt prepended to every generation.
    pub persona: String,

    pub fortune_cycle_hours: i64,
    pub fortune_point_cost: u32,
    pub friend_talk_cost: u32,
    pub draw_cost: u32,

    pub base_percent: f64,
    pub mention_bonus_percent: f64,
    pub idle_bonus_percent: f64,
    pub idle_window_minutes: i64,

    /// Dialog entries replayed as context for free talk.
    pub dialog_window: u32,
    /// Maximum characters per reply segment.
    pub chunk_chars: usize,

    pub page_limit: u32,
    pub max_pages: u32,

    /// Answered Event ids are remembered this long.
    pub processed_ttl: Duration,
    pub processed_capacity: usize,

    /// PDS endpoint whose accounts are counted and ranked.
    pub directory_endpoint: String,
    pub milestone_step: u64,

    pub retry: RetryPolicy,
    pub session: SessionPolicy,
    /// Minimum spacing between any two outbound calls.
    pub min_call_gap: Duration,
}

impl EngineConfig {
    pub fn fortune_cycle(&self) -> TimeDelta {
        TimeDelta::hours(self.fortune_cycle_hours)
    }

    pub fn idle_window(&self) -> TimeDelta {
        TimeDelta::minutes(self.idle_window_minutes)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bot_names: Vec::new(),
            persona: "You are a cheerful, polite assistant living on a social network.".into(),
            fortune_cycle_hours: 24,
            fortune_point_cost: 1,
            friend_talk_cost: 1,
            draw_cost: 5,
            base_percent: 3.0,
            mention_bonus_percent: 5.0,
            idle_bonus_percent: 100.0,
            idle_window_minutes: 60,
            dialog_window: 10,
            chunk_chars: 280,
            page_limit: 50,
            max_pages: 3,
            processed_ttl: Duration::from_secs(6 * 60 * 60),
            processed_capacity: 4096,
            directory_endpoint: "https://bsky.social".into(),
            milestone_step: 100,
            retry: RetryPolicy::default(),
            session: SessionPolicy::default(),
            min_call_gap: Duration::from_millis(250),
        }
    }
}
