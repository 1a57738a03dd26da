use chrono::{DateTime, Utc};

use skybot_types::Event;

/// Why an Event may not produce a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    OwnPost,
    AlreadyProcessed,
    Muted,
    BlockedBy,
    NotFollower,
    /// Aimed at someone other than the bot.
    OtherMention,
    /// Likes, reposts and the like carry nothing to answer.
    NotConversational,
}

impl Ineligible {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OwnPost => "own_post",
            Self::AlreadyProcessed => "already_processed",
            Self::Muted => "muted",
            Self::BlockedBy => "blocked_by",
            Self::NotFollower => "not_follower",
            Self::OtherMention => "other_mention",
            Self::NotConversational => "not_conversational",
        }
    }
}

/// Pure predicate over an Event and its relationship snapshot.
#[derive(Debug, Clone)]
pub struct EligibilityFilter {
    bot_id: String,
}

impl EligibilityFilter {
    pub fn new(bot_id: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
        }
    }

    pub fn is_eligible(&self, event: &Event, watermark: DateTime<Utc>) -> bool {
        self.check(event, watermark).is_ok()
    }

    /// Rules run in order; the first failure is reported.
    pub fn check(&self, event: &Event, watermark: DateTime<Utc>) -> Result<(), Ineligible> {
        self.check_identity(event, watermark)?;

        let rel = event.relationship;
        if rel.muted {
            return Err(Ineligible::Muted);
        }
        if rel.blocked_by {
            return Err(Ineligible::BlockedBy);
        }
        if !rel.followed_by {
            return Err(Ineligible::NotFollower);
        }

        if self.mentions_someone_else(event) {
            return Err(Ineligible::OtherMention);
        }
        if !event.reason.is_conversational() {
            return Err(Ineligible::NotConversational);
        }

        Ok(())
    }

    /// Follow notifications skip follower gating: the author has only just
    /// started following.
    pub fn check_follow(&self, event: &Event, watermark: DateTime<Utc>) -> Result<(), Ineligible> {
        self.check_identity(event, watermark)?;
        if event.relationship.blocked_by {
            return Err(Ineligible::BlockedBy);
        }
        Ok(())
    }

    fn check_identity(&self, event: &Event, watermark: DateTime<Utc>) -> Result<(), Ineligible> {
        if event.author_id == self.bot_id {
            return Err(Ineligible::OwnPost);
        }
        if event.created_at <= watermark {
            return Err(Ineligible::AlreadyProcessed);
        }
        Ok(())
    }

    fn mentions_someone_else(&self, event: &Event) -> bool {
        let other_mention = event.mentioned_ids.iter().any(|id| *id != self.bot_id);
        let other_parent = event
            .parent_ref
            .as_ref()
            .is_some_and(|parent| parent.author_did() != Some(self.bot_id.as_str()));
        other_mention || other_parent
    }
}
