use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

use skybot_types::api::{ImageAttachment, PostDraft, ReplyRef, SessionInfo};
use skybot_types::{ClientError, Event, PostRef};

use crate::client::SocialClient;
use crate::error::DispatchError;
use crate::normalizer::reply_target;

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Every outbound network call goes through here: transient errors are
/// retried with backoff, permanent ones abandoned, and calls are spaced at
/// least `min_gap` apart.
pub struct Dispatcher {
    policy: RetryPolicy,
    min_gap: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl Dispatcher {
    pub fn new(policy: RetryPolicy, min_gap: Duration) -> Self {
        Self {
            policy,
            min_gap,
            last_call: Mutex::new(None),
        }
    }

    pub async fn call<T, F, Fut>(&self, action: &str, mut op: F) -> Result<T, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.pace().await;

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    if attempt >= max_attempts {
                        warn!(action, attempts = attempt, "Giving up: {}", e);
                        return Err(DispatchError::Exhausted {
                            action: action.to_string(),
                            attempts: attempt,
                            source: e,
                        });
                    }
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        action,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(action, "Abandoning: {}", e);
                    return Err(DispatchError::Abandoned {
                        action: action.to_string(),
                        source: e,
                    });
                }
            }
        }
    }

    async fn pace(&self) {
        if self.min_gap.is_zero() {
            return;
        }
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_gap;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Post `text` as a reply chain under `event`. Segments thread onto each
    /// other; the image, if any, rides on the first one. Returns the refs of
    /// every posted segment.
    pub async fn reply(
        &self,
        social: &dyn SocialClient,
        event: &Event,
        text: &str,
        image: Option<ImageAttachment>,
        chunk_chars: usize,
    ) -> Result<Vec<PostRef>, DispatchError> {
        let (root, mut parent) = reply_target(event);
        let mut image = image;
        let mut posted = Vec::new();

        for segment in chunk_text(text, chunk_chars) {
            let draft = PostDraft {
                text: segment,
                reply: Some(ReplyRef {
                    root: root.clone(),
                    parent: parent.clone(),
                }),
                image: image.take(),
            };
            let created = self
                .call("create_post", || social.create_post(&draft))
                .await?;
            parent = created.clone();
            posted.push(created);
        }

        Ok(posted)
    }

    /// Standalone top-level post, chunked like a reply chain.
    pub async fn post(
        &self,
        social: &dyn SocialClient,
        text: &str,
        chunk_chars: usize,
    ) -> Result<Vec<PostRef>, DispatchError> {
        let mut thread: Option<(PostRef, PostRef)> = None;
        let mut posted = Vec::new();

        for segment in chunk_text(text, chunk_chars) {
            let draft = PostDraft {
                text: segment,
                reply: thread.as_ref().map(|(root, parent)| ReplyRef {
                    root: root.clone(),
                    parent: parent.clone(),
                }),
                image: None,
            };
            let created = self
                .call("create_post", || social.create_post(&draft))
                .await?;
            let root = thread.map(|(root, _)| root).unwrap_or_else(|| created.clone());
            thread = Some((root, created.clone()));
            posted.push(created);
        }

        Ok(posted)
    }

    pub async fn follow(&self, social: &dyn SocialClient, did: &str) -> Result<(), DispatchError> {
        self.call("follow", || social.follow(did)).await
    }
}

/// Split `text` into segments of at most `max_chars` characters, breaking
/// at a newline in the second half of a segment when one exists.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    let max_chars = max_chars.max(1);
    let chars: Vec<char> = text.chars().collect();
    let mut segments = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let remaining = chars.len() - start;
        if remaining <= max_chars {
            segments.push(chars[start..].iter().collect::<String>());
            break;
        }

        let window = &chars[start..start + max_chars];
        let cut = window
            .iter()
            .rposition(|c| *c == '\n')
            .filter(|pos| *pos >= max_chars / 2)
            .map(|pos| pos + 1)
            .unwrap_or(max_chars);

        let segment: String = chars[start..start + cut].iter().collect();
        let segment = segment.trim_end().to_string();
        if !segment.is_empty() {
            segments.push(segment);
        }
        start += cut;
    }

    segments
}

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// Re-login this often, whether or not requests are failing.
    pub relogin_interval: TimeDelta,
    /// Never attempt two logins closer together than this.
    pub min_login_gap: TimeDelta,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            relogin_interval: TimeDelta::minutes(90),
            min_login_gap: TimeDelta::seconds(60),
        }
    }
}

/// Keeps the social session fresh on a fixed schedule.
pub struct SessionKeeper {
    policy: SessionPolicy,
    session: Option<SessionInfo>,
    logged_in_at: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
}

impl SessionKeeper {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            policy,
            session: None,
            logged_in_at: None,
            last_attempt: None,
        }
    }

    /// Seed with a session obtained at startup.
    pub fn with_session(policy: SessionPolicy, session: SessionInfo, at: DateTime<Utc>) -> Self {
        Self {
            policy,
            session: Some(session),
            logged_in_at: Some(at),
            last_attempt: Some(at),
        }
    }

    pub fn needs_login(&self, now: DateTime<Utc>) -> bool {
        let too_soon = self
            .last_attempt
            .is_some_and(|last| now - last < self.policy.min_login_gap);
        if too_soon {
            return false;
        }
        match self.logged_in_at {
            None => true,
            Some(at) => now - at >= self.policy.relogin_interval,
        }
    }

    /// Log in if the session is missing or due for refresh. A failed login
    /// keeps the previous session and is retried after the minimum gap.
    pub async fn ensure(
        &mut self,
        social: &dyn SocialClient,
        dispatcher: &Dispatcher,
        now: DateTime<Utc>,
    ) -> Result<Option<&SessionInfo>, DispatchError> {
        if !self.needs_login(now) {
            return Ok(self.session.as_ref());
        }

        self.last_attempt = Some(now);
        let session = dispatcher.call("login", || social.login()).await?;
        info!(did = %session.did, handle = %session.handle, "Session refreshed");
        self.session = Some(session);
        self.logged_in_at = Some(now);
        Ok(self.session.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[test]
    fn backoff_doubles_up_to_the_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for(40), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let dispatcher = Dispatcher::new(quick_policy(5), Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result = dispatcher
            .call("fetch", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ClientError::Timeout)
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_stop_at_the_attempt_ceiling() {
        let dispatcher = Dispatcher::new(quick_policy(3), Duration::ZERO);
        let calls = AtomicU32::new(0);

        let err = dispatcher
            .call("fetch", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ClientError::Server { status: 502, body: String::new() }) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Exhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let dispatcher = Dispatcher::new(quick_policy(5), Duration::ZERO);
        let calls = AtomicU32::new(0);

        let err = dispatcher
            .call("post", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ClientError::Malformed("bad record".into())) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Abandoned { .. }));
        assert!(!err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn short_text_is_one_segment() {
        assert_eq!(chunk_text("  hello  ", 280), vec!["hello"]);
        assert!(chunk_text("   ", 280).is_empty());
    }

    #[test]
    fn long_text_splits_by_characters() {
        let text = "あ".repeat(650);
        let segments = chunk_text(&text, 300);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].chars().count(), 300);
        assert_eq!(segments[2].chars().count(), 50);
    }

    #[test]
    fn splits_prefer_a_late_newline() {
        let text = format!("{}\n{}", "a".repeat(8), "b".repeat(8));
        let segments = chunk_text(&text, 10);
        assert_eq!(segments, vec!["a".repeat(8), "b".repeat(8)]);
    }

    #[test]
    fn relogin_is_scheduled_and_gap_limited() {
        let t0 = Utc::now();
        let session = SessionInfo {
            did: "did:plc:bot".into(),
            handle: "bot.test".into(),
        };
        let keeper = SessionKeeper::with_session(SessionPolicy::default(), session, t0);
        assert!(!keeper.needs_login(t0 + TimeDelta::minutes(89)));
        assert!(keeper.needs_login(t0 + TimeDelta::minutes(90)));

        let fresh = SessionKeeper::new(SessionPolicy::default());
        assert!(fresh.needs_login(t0));
    }
}
