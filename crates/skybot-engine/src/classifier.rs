use skybot_types::{Event, StreamKind};

/// A command or free talk, decided from an Event's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Fortune,
    Draw,
    Status,
    Friend,
    Silent,
    FreeTalk,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fortune => "fortune",
            Self::Draw => "draw",
            Self::Status => "status",
            Self::Friend => "friend",
            Self::Silent => "silent",
            Self::FreeTalk => "free_talk",
        }
    }

    pub fn is_command(&self) -> bool {
        !matches!(self, Self::FreeTalk)
    }
}

/// Commands in priority order. The first whose keyword set matches wins.
const COMMANDS: [(Intent, &[&str]); 5] = [
    (Intent::Fortune, &["占って", "占い", "fortune"]),
    (Intent::Draw, &["描いて", "draw"]),
    (Intent::Status, &["status"]),
    (Intent::Friend, &["friend"]),
    (Intent::Silent, &["silent"]),
];

/// Marks a fortune request as willing to spend points to skip the cooldown.
const POINT_SPEND_KEYWORDS: [&str; 2] = ["ポイント", "point"];

/// Keyword containment, case-sensitive. Commands need the text to be
/// directed at the bot; undirected text is always free talk.
pub fn classify(text: &str, mentioned: bool) -> Intent {
    if !mentioned {
        return Intent::FreeTalk;
    }
    COMMANDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::FreeTalk)
}

pub fn wants_point_spend(text: &str) -> bool {
    POINT_SPEND_KEYWORDS.iter().any(|k| text.contains(k))
}

/// How an Event is aimed at the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Not aimed at the bot.
    Ambient,
    /// One of the bot's names appears in plain text. No notification
    /// will be raised for it, so the timeline owns it.
    Named,
    /// A mention facet, a reply to the bot, or a notification. The
    /// notification stream owns it.
    Notified,
}

impl Addressing {
    pub fn is_directed(&self) -> bool {
        !matches!(self, Self::Ambient)
    }
}

/// Decides whether text is aimed at the bot.
#[derive(Debug, Clone)]
pub struct MentionDetector {
    bot_id: String,
    names: Vec<String>,
}

impl MentionDetector {
    /// `names` are nicknames matched verbatim; the handle is matched with
    /// and without its leading `@`.
    pub fn new(bot_id: impl Into<String>, bot_handle: &str, names: &[String]) -> Self {
        let mut all: Vec<String> = names
            .iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        if !bot_handle.is_empty() {
            all.push(format!("@{bot_handle}"));
            all.push(bot_handle.to_string());
        }
        Self {
            bot_id: bot_id.into(),
            names: all,
        }
    }

    pub fn addressing(&self, event: &Event) -> Addressing {
        let notified = event.source == StreamKind::Notification
            || event.mentioned_ids.contains(&self.bot_id)
            || event.parent_author_id() == Some(self.bot_id.as_str());
        if notified {
            Addressing::Notified
        } else if self.names.iter().any(|name| event.text.contains(name.as_str())) {
            Addressing::Named
        } else {
            Addressing::Ambient
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use skybot_types::{PostRef, Reason, Relationship};
    use std::collections::BTreeSet;

    #[test]
    fn keywords_map_to_intents() {
        assert_eq!(classify("今日を占って！", true), Intent::Fortune);
        assert_eq!(classify("猫を描いて", true), Intent::Draw);
        assert_eq!(classify("my status please", true), Intent::Status);
        assert_eq!(classify("be my friend", true), Intent::Friend);
        assert_eq!(classify("go silent", true), Intent::Silent);
        assert_eq!(classify("good morning", true), Intent::FreeTalk);
    }

    #[test]
    fn first_intent_in_priority_order_wins() {
        assert_eq!(classify("friend, 占って", true), Intent::Fortune);
        assert_eq!(classify("draw my status", true), Intent::Draw);
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert_eq!(classify("STATUS", true), Intent::FreeTalk);
    }

    #[test]
    fn undirected_text_is_free_talk() {
        assert_eq!(classify("fortune cookies are great", false), Intent::FreeTalk);
    }

    #[test]
    fn point_spend_is_detected() {
        assert!(wants_point_spend("ポイント使って占って"));
        assert!(wants_point_spend("fortune, use a point"));
        assert!(!wants_point_spend("fortune"));
    }

    fn post(text: &str) -> Event {
        Event {
            id: "at://did:plc:alice/app.bsky.feed.post/1".into(),
            cid: "c1".into(),
            author_id: "did:plc:alice".into(),
            author_handle: "alice.test".into(),
            author_display_name: String::new(),
            text: text.into(),
            created_at: Utc::now(),
            root_ref: None,
            parent_ref: None,
            mentioned_ids: BTreeSet::new(),
            reason: Reason::None,
            source: StreamKind::Timeline,
            relationship: Relationship::default(),
        }
    }

    #[test]
    fn addressing_distinguishes_named_from_notified() {
        let detector = MentionDetector::new("did:plc:bot", "bot.test", &["ぼっとちゃん".into()]);

        assert_eq!(detector.addressing(&post("nice weather")), Addressing::Ambient);
        assert_eq!(detector.addressing(&post("ぼっとちゃん status")), Addressing::Named);

        let mut faceted = post("@bot.test status");
        faceted.mentioned_ids.insert("did:plc:bot".into());
        assert_eq!(detector.addressing(&faceted), Addressing::Notified);

        let mut reply = post("thanks");
        reply.parent_ref = Some(PostRef::new("at://did:plc:bot/app.bsky.feed.post/2", "c2"));
        assert_eq!(detector.addressing(&reply), Addressing::Notified);

        let mut notification = post("hi");
        notification.source = StreamKind::Notification;
        assert_eq!(detector.addressing(&notification), Addressing::Notified);
    }
}
