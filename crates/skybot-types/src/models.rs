use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-author reply mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Only the `friend` command is answered.
    SilentStrong,
    /// Commands are answered, free talk is not.
    #[default]
    Silent,
    /// Commands and probability-gated free talk.
    Friend,
}

impl Mode {
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::SilentStrong => -1,
            Self::Silent => 0,
            Self::Friend => 1,
        }
    }

    /// Values outside the known range clamp to the nearest mode.
    pub fn from_i64(value: i64) -> Self {
        match value {
            i64::MIN..=-1 => Self::SilentStrong,
            0 => Self::Silent,
            _ => Self::Friend,
        }
    }

    pub fn is_friend(&self) -> bool {
        self.as_i64() > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("insufficient points: need {needed}, have {available}")]
pub struct InsufficientPoints {
    pub needed: u32,
    pub available: u32,
}

/// Spendable and lifetime point balances for one author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEconomy {
    pub did: String,
    pub mode: Mode,
    pub points: u32,
    /// Lifetime credits. Never decreases.
    pub all_points: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserEconomy {
    pub fn new(did: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            did: did.into(),
            mode: Mode::default(),
            points: 0,
            all_points: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn credit(&mut self, amount: u32) {
        self.points = self.points.saturating_add(amount);
        self.all_points = self.all_points.saturating_add(amount);
    }

    /// Spend points. The balance is left untouched when it cannot cover `amount`.
    pub fn debit(&mut self, amount: u32) -> Result<(), InsufficientPoints> {
        match self.points.checked_sub(amount) {
            Some(rest) => {
                self.points = rest;
                Ok(())
            }
            None => Err(InsufficientPoints {
                needed: amount,
                available: self.points,
            }),
        }
    }
}

/// One fortune reaction given to an author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FortuneRecord {
    pub did: String,
    pub handle: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogEntry {
    pub did: String,
    pub role: Role,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// A chat turn handed to the completion client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl From<&DialogEntry> for ChatMessage {
    fn from(entry: &DialogEntry) -> Self {
        Self {
            role: entry.role,
            content: entry.message.clone(),
        }
    }
}

/// Watermark for one polled stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCursor {
    pub stream: crate::events::StreamKind,
    pub last_processed_at: DateTime<Utc>,
    /// Last opaque pagination token returned by the server.
    pub cursor: Option<String>,
}

/// Relationship depth derived from how often the bot interacted with an author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamiliarityTier {
    New,
    Warming,
    Warm,
    Close,
    Lifelong,
}

impl FamiliarityTier {
    /// Ascending `(threshold, tier)` pairs; a score belongs to the last
    /// tier whose threshold it reaches.
    pub const THRESHOLDS: [(u64, FamiliarityTier); 5] = [
        (0, FamiliarityTier::New),
        (5, FamiliarityTier::Warming),
        (10, FamiliarityTier::Warm),
        (30, FamiliarityTier::Close),
        (100, FamiliarityTier::Lifelong),
    ];

    pub fn from_score(score: u64) -> Self {
        Self::THRESHOLDS
            .iter()
            .filter(|(threshold, _)| score >= *threshold)
            .map(|(_, tier)| *tier)
            .last()
            .unwrap_or(FamiliarityTier::New)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Warming => "warming",
            Self::Warm => "warm",
            Self::Close => "close",
            Self::Lifelong => "lifelong",
        }
    }

    /// Phrase injected into generation prompts.
    pub fn prompt_hint(&self) -> &'static str {
        match self {
            Self::New => "You are meeting this person for the first time.",
            Self::Warming => "You have talked with this person a few times.",
            Self::Warm => "This person is a familiar acquaintance.",
            Self::Close => "This person is a close friend.",
            Self::Lifelong => "This person is a lifelong friend you deeply trust.",
        }
    }
}

/// Result recorded in the command log for each handled Event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    Replied,
    Denied,
    Skipped,
    Failed,
}

impl CommandOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replied => "replied",
            Self::Denied => "denied",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// Account entry mirrored from the PLC directory export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub did: String,
    pub handle: String,
    pub endpoint: String,
    /// Export timestamp, kept verbatim so it can be fed back as `after`.
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn familiarity_tiers_use_ascending_thresholds() {
        assert_eq!(FamiliarityTier::from_score(0), FamiliarityTier::New);
        assert_eq!(FamiliarityTier::from_score(4), FamiliarityTier::New);
        assert_eq!(FamiliarityTier::from_score(5), FamiliarityTier::Warming);
        assert_eq!(FamiliarityTier::from_score(29), FamiliarityTier::Warm);
        assert_eq!(FamiliarityTier::from_score(30), FamiliarityTier::Close);
        assert_eq!(FamiliarityTier::from_score(100), FamiliarityTier::Lifelong);
        assert_eq!(FamiliarityTier::from_score(5000), FamiliarityTier::Lifelong);
    }

    #[test]
    fn debit_never_goes_negative() {
        let mut economy = UserEconomy::new("did:plc:a", Utc::now());
        economy.credit(2);
        assert!(economy.debit(5).is_err());
        assert_eq!(economy.points, 2);
        economy.debit(2).unwrap();
        assert_eq!(economy.points, 0);
        assert_eq!(economy.all_points, 2);
    }

    #[test]
    fn mode_round_trips_through_integers() {
        for mode in [Mode::SilentStrong, Mode::Silent, Mode::Friend] {
            assert_eq!(Mode::from_i64(mode.as_i64()), mode);
        }
        assert_eq!(Mode::from_i64(7), Mode::Friend);
        assert!(!Mode::Silent.is_friend());
    }
}
