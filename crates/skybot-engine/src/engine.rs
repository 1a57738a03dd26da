use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, error, info, warn};

use skybot_db::Database;
use skybot_types::api::{ImageAttachment, SessionInfo};
use skybot_types::{ChatMessage, CommandOutcome, Event, Mode, Reason, Role, StreamKind, UserEconomy};

use crate::classifier::{Addressing, Intent, MentionDetector, classify, wants_point_spend};
use crate::client::{CompletionClient, ImageRenderer, SocialClient};
use crate::config::EngineConfig;
use crate::cursor::{CursorTracker, reaches_watermark, select_new};
use crate::dedup::{self, ProcessedSet};
use crate::dispatcher::{Dispatcher, SessionKeeper};
use crate::economy::EconomyStore;
use crate::eligibility::EligibilityFilter;
use crate::error::{DispatchError, EngineError};
use crate::normalizer::{normalize_notifications, normalize_timeline};
use crate::templates;
use crate::throttle::{DrawDecision, FortuneDecision, FreeTalkContext, FreeTalkDecision, ReplyThrottle};

/// Everything the engine talks to, built once at startup.
#[derive(Clone)]
pub struct EngineContext {
    pub db: Arc<Database>,
    pub social: Arc<dyn SocialClient>,
    pub completion: Arc<dyn CompletionClient>,
    pub renderer: Arc<dyn ImageRenderer>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: EngineConfig,
}

/// What happened to one Event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// Filtered, deferred to the other stream, or not worth answering.
    Ignored,
    FollowedBack,
    Acted {
        intent: Intent,
        outcome: CommandOutcome,
    },
}

/// The main decision loop. Events are processed one at a time, so economy
/// reads always see the previous Event's writes.
pub struct Engine {
    ctx: EngineContext,
    bot: SessionInfo,
    filter: EligibilityFilter,
    detector: MentionDetector,
    economy: EconomyStore,
    cursors: CursorTracker,
    throttle: ReplyThrottle,
    processed: ProcessedSet,
    keeper: SessionKeeper,
    rng: StdRng,
    last_reply_at: Option<DateTime<Utc>>,
}

impl Engine {
    /// `bot` is the session obtained by the startup login.
    pub fn new(ctx: EngineContext, bot: SessionInfo) -> anyhow::Result<Self> {
        let config = &ctx.config;
        let last_reply_at = ctx.db.latest_reply_at()?;

        Ok(Self {
            filter: EligibilityFilter::new(bot.did.clone()),
            detector: MentionDetector::new(bot.did.clone(), &bot.handle, &config.bot_names),
            economy: EconomyStore::new(ctx.db.clone()),
            cursors: CursorTracker::new(ctx.db.clone()),
            throttle: ReplyThrottle::new(config),
            processed: ProcessedSet::new(config.processed_ttl, config.processed_capacity),
            keeper: SessionKeeper::with_session(config.session.clone(), bot.clone(), Utc::now()),
            rng: StdRng::from_os_rng(),
            last_reply_at,
            bot,
            ctx,
        })
    }

    /// Replace the free-talk dice.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub async fn run(mut self, poll_interval: Duration) {
        info!(did = %self.bot.did, handle = %self.bot.handle, "Decision loop started");
        loop {
            self.run_cycle().await;
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// One pass over both streams, notifications first.
    pub async fn run_cycle(&mut self) {
        let social = self.ctx.social.clone();
        if let Err(e) = self
            .keeper
            .ensure(social.as_ref(), &self.ctx.dispatcher, Utc::now())
            .await
        {
            warn!("Session refresh failed: {}", e);
        }

        for stream in StreamKind::ALL {
            if let Err(e) = self.run_stream(stream).await {
                warn!(%stream, "Stream cycle cut short: {}", e);
            }
        }
    }

    /// Fetch, then process new Events oldest-first. The watermark moves to a
    /// timestamp only once every Event carrying it has its effects stored; a
    /// transient failure stops the batch so the Event is fetched again next
    /// cycle.
    pub async fn run_stream(&mut self, stream: StreamKind) -> Result<usize, EngineError> {
        let now = Utc::now();
        let watermark = self.cursors.watermark(stream, now)?;
        let events = self.poll_stream(stream, watermark).await?;
        if !events.is_empty() {
            debug!(%stream, count = events.len(), "New events");
        }

        let mut done = 0;
        for (i, event) in events.iter().enumerate() {
            match self.process_event(event, watermark).await {
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    warn!(%stream, id = %event.id, "Deferring to next cycle: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    error!(%stream, id = %event.id, did = %event.author_id, "Event failed: {}", e);
                }
            }
            done += 1;
            // Events sharing this timestamp are still pending.
            let last_at_timestamp = events
                .get(i + 1)
                .is_none_or(|next| next.created_at > event.created_at);
            if last_at_timestamp {
                self.cursors.advance(stream, event.created_at)?;
            }
        }
        Ok(done)
    }

    /// Page back until the watermark is reached, the cursor runs out or the
    /// page budget is spent.
    async fn poll_stream(
        &mut self,
        stream: StreamKind,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<Event>, EngineError> {
        let limit = self.ctx.config.page_limit;
        let mut cursor: Option<String> = None;
        let mut collected = Vec::new();

        for _ in 0..self.ctx.config.max_pages.max(1) {
            let (events, raw_len, next) = self.fetch_page(stream, cursor.as_deref(), limit).await?;
            let reached = reaches_watermark(&events, watermark);
            let done = reached || raw_len == 0 || next.is_none();
            collected.extend(events);
            if next.is_some() {
                cursor = next;
            }
            if done {
                break;
            }
        }

        self.cursors.record_page_cursor(stream, cursor.as_deref())?;
        Ok(select_new(collected, watermark))
    }

    async fn fetch_page(
        &self,
        stream: StreamKind,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<(Vec<Event>, usize, Option<String>), DispatchError> {
        let social = self.ctx.social.as_ref();
        let dispatcher = &self.ctx.dispatcher;
        match stream {
            StreamKind::Timeline => {
                let page = dispatcher
                    .call("get_timeline", || social.timeline(cursor, limit))
                    .await?;
                Ok((normalize_timeline(&page), page.feed.len(), page.cursor))
            }
            StreamKind::Notification => {
                let page = dispatcher
                    .call("list_notifications", || social.notifications(cursor, limit))
                    .await?;
                Ok((
                    normalize_notifications(&page),
                    page.notifications.len(),
                    page.cursor,
                ))
            }
        }
    }

    pub async fn process_event(
        &mut self,
        event: &Event,
        watermark: DateTime<Utc>,
    ) -> Result<Handled, EngineError> {
        if event.reason == Reason::Follow {
            return self.follow_back(event, watermark).await;
        }

        if let Err(reason) = self.filter.check(event, watermark) {
            debug!(id = %event.id, did = %event.author_id, reason = reason.as_str(), "Ineligible");
            return Ok(Handled::Ignored);
        }

        let addressing = self.detector.addressing(event);
        if !dedup::should_handle(event.source, addressing) {
            debug!(id = %event.id, stream = %event.source, "Left to the notification stream");
            return Ok(Handled::Ignored);
        }
        if self.processed.contains(&event.id) {
            debug!(id = %event.id, "Already answered");
            return Ok(Handled::Ignored);
        }

        let now = Utc::now();
        let intent = classify(&event.text, addressing.is_directed());
        let economy = self.economy.get_or_create(&event.author_id, now)?;

        if economy.mode == Mode::SilentStrong && intent != Intent::Friend {
            debug!(did = %event.author_id, intent = intent.as_str(), "Author asked for silence");
            if intent.is_command() {
                self.log_command(event, intent, CommandOutcome::Skipped, now)?;
            }
            return Ok(Handled::Ignored);
        }

        let result = match intent {
            Intent::Fortune => self.handle_fortune(event, &economy, now).await.map(Some),
            Intent::Draw => self.handle_draw(event, &economy, now).await.map(Some),
            Intent::Status => self.handle_status(event, &economy).await.map(Some),
            Intent::Friend => self.handle_friend(event, now).await.map(Some),
            Intent::Silent => self.handle_silent(event, &economy, now).await.map(Some),
            Intent::FreeTalk => self.handle_free_talk(event, addressing, &economy, now).await,
        };

        match result {
            Ok(Some(outcome)) => {
                info!(
                    did = %event.author_id,
                    intent = intent.as_str(),
                    outcome = outcome.as_str(),
                    "Handled event"
                );
                if outcome != CommandOutcome::Skipped {
                    self.processed.insert(&event.id);
                }
                if outcome == CommandOutcome::Replied {
                    self.last_reply_at = Some(now);
                }
                self.log_command(event, intent, outcome, now)?;
                Ok(Handled::Acted { intent, outcome })
            }
            Ok(None) => {
                if intent.is_command() {
                    self.log_command(event, intent, CommandOutcome::Skipped, now)?;
                }
                Ok(Handled::Ignored)
            }
            Err(e) => {
                // Transient failures are retried next cycle, so only
                // permanent ones are recorded.
                if !e.is_transient() {
                    self.log_command(event, intent, CommandOutcome::Failed, now)?;
                }
                Err(e)
            }
        }
    }

    async fn follow_back(
        &mut self,
        event: &Event,
        watermark: DateTime<Utc>,
    ) -> Result<Handled, EngineError> {
        if event.source != StreamKind::Notification {
            return Ok(Handled::Ignored);
        }
        if let Err(reason) = self.filter.check_follow(event, watermark) {
            debug!(did = %event.author_id, reason = reason.as_str(), "Not following back");
            return Ok(Handled::Ignored);
        }
        if event.relationship.following {
            debug!(did = %event.author_id, "Already following");
            return Ok(Handled::Ignored);
        }

        self.ctx
            .dispatcher
            .follow(self.ctx.social.as_ref(), &event.author_id)
            .await?;
        info!(did = %event.author_id, handle = %event.author_handle, "Followed back");
        Ok(Handled::FollowedBack)
    }

    async fn handle_fortune(
        &mut self,
        event: &Event,
        economy: &UserEconomy,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, EngineError> {
        let latest = self.economy.latest_fortune(&event.author_id)?;
        let decision =
            self.throttle
                .fortune(economy, latest.as_ref(), wants_point_spend(&event.text), now);

        let cost = match decision {
            FortuneDecision::Deny { remaining, points } => {
                let text = templates::fortune_cooldown(
                    self.ctx.config.fortune_cycle_hours,
                    remaining,
                    points,
                    self.ctx.config.fortune_point_cost,
                );
                self.reply(event, &text, None).await?;
                return Ok(CommandOutcome::Denied);
            }
            FortuneDecision::Allow => None,
            FortuneDecision::AllowWithPointSpend { cost } => Some(cost),
        };

        let system = self.system_prompt(&event.author_id)?;
        let answer = self
            .generate(&system, &[], &templates::fortune_request(&event.text))
            .await?;
        self.reply(event, &answer, None).await?;

        self.economy.record_fortune(event)?;
        if let Some(cost) = cost {
            let after = self.economy.debit(&event.author_id, cost, now)?;
            info!(did = %event.author_id, cost, points = after.points, "Fortune cooldown skipped");
        }
        Ok(CommandOutcome::Replied)
    }

    async fn handle_draw(
        &mut self,
        event: &Event,
        economy: &UserEconomy,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, EngineError> {
        let cost = match self.throttle.draw(economy) {
            DrawDecision::Insufficient { cost, points } => {
                self.reply(event, &templates::draw_insufficient(cost, points), None)
                    .await?;
                return Ok(CommandOutcome::Denied);
            }
            DrawDecision::Allowed { cost } => cost,
        };

        let system = self.system_prompt(&event.author_id)?;
        let answer = self
            .generate(&system, &[], &templates::draw_request(&event.text))
            .await?;

        let Some(svg) = templates::extract_svg(&answer).map(str::to_string) else {
            warn!(did = %event.author_id, "Completion contained no SVG");
            self.reply(event, &templates::draw_failed(), None).await?;
            return Ok(CommandOutcome::Failed);
        };

        let renderer = self.ctx.renderer.clone();
        let png = match tokio::task::spawn_blocking(move || renderer.render_png(&svg)).await? {
            Ok(png) => png,
            Err(e) => {
                warn!(did = %event.author_id, "SVG render failed: {:#}", e);
                self.reply(event, &templates::draw_failed(), None).await?;
                return Ok(CommandOutcome::Failed);
            }
        };

        let social = self.ctx.social.as_ref();
        let blob = self
            .ctx
            .dispatcher
            .call("upload_blob", || social.upload_image(&png))
            .await?;
        let image = ImageAttachment {
            blob,
            alt: event.text.chars().take(100).collect(),
        };
        self.reply(event, &templates::draw_caption(&event.text), Some(image))
            .await?;

        let after = self.economy.debit(&event.author_id, cost, now)?;
        info!(did = %event.author_id, cost, points = after.points, "Drawing delivered");
        Ok(CommandOutcome::Replied)
    }

    async fn handle_status(
        &mut self,
        event: &Event,
        economy: &UserEconomy,
    ) -> Result<CommandOutcome, EngineError> {
        let directory = self
            .ctx
            .db
            .directory_user_info(&event.author_id, &self.ctx.config.directory_endpoint)?;
        let tier = self.economy.familiarity_tier(&event.author_id)?;
        let text = templates::status_report(&event.author_handle, directory, economy, tier);
        self.reply(event, &text, None).await?;
        Ok(CommandOutcome::Replied)
    }

    async fn handle_friend(
        &mut self,
        event: &Event,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, EngineError> {
        self.reply(event, &templates::friend_confirmed(), None).await?;
        self.economy.set_mode(&event.author_id, Mode::Friend, now)?;
        Ok(CommandOutcome::Replied)
    }

    async fn handle_silent(
        &mut self,
        event: &Event,
        economy: &UserEconomy,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, EngineError> {
        let mode = match economy.mode {
            Mode::Friend => Mode::Silent,
            Mode::Silent | Mode::SilentStrong => Mode::SilentStrong,
        };
        self.reply(event, &templates::silent_confirmed(mode), None)
            .await?;
        self.economy.set_mode(&event.author_id, mode, now)?;
        Ok(CommandOutcome::Replied)
    }

    /// `None` when the throttle decides not to answer.
    async fn handle_free_talk(
        &mut self,
        event: &Event,
        addressing: Addressing,
        economy: &UserEconomy,
        now: DateTime<Utc>,
    ) -> Result<Option<CommandOutcome>, EngineError> {
        if event.text.trim().is_empty() {
            return Ok(None);
        }

        let ctx = FreeTalkContext {
            directed: addressing.is_directed(),
            wants_point_spend: wants_point_spend(&event.text),
            last_reply_at: self.last_reply_at,
            now,
        };
        let decision = self.throttle.free_talk(economy, &ctx, &mut self.rng);
        let paid = match decision {
            FreeTalkDecision::NotFriend => return Ok(None),
            FreeTalkDecision::Pass { roll, chance } => {
                debug!(did = %event.author_id, roll, chance, "Free talk passed");
                return Ok(None);
            }
            FreeTalkDecision::Reply { .. } => None,
            FreeTalkDecision::FriendTalk { cost } => Some(cost),
        };

        let system = self.system_prompt(&event.author_id)?;
        let history = self
            .economy
            .dialog_context(&event.author_id, self.ctx.config.dialog_window)?;
        let answer = self.generate(&system, &history, &event.text).await?;
        self.reply(event, &answer, None).await?;

        let did = &event.author_id;
        self.economy
            .append_dialog(did, Role::User, &event.text, event.created_at)?;
        self.economy.append_dialog(did, Role::Assistant, &answer, now)?;
        let after = match paid {
            Some(cost) => self.economy.debit(did, cost, now)?,
            None => self.economy.credit(did, 1, now)?,
        };
        debug!(did = %did, points = after.points, all_points = after.all_points, "Economy updated");
        Ok(Some(CommandOutcome::Replied))
    }

    fn system_prompt(&self, did: &str) -> Result<String, EngineError> {
        let tier = self.economy.familiarity_tier(did)?;
        Ok(templates::system_prompt(&self.ctx.config.persona, tier))
    }

    async fn generate(
        &self,
        system: &str,
        history: &[ChatMessage],
        user: &str,
    ) -> Result<String, EngineError> {
        let completion = self.ctx.completion.as_ref();
        let answer = self
            .ctx
            .dispatcher
            .call("complete", || completion.complete(system, history, user))
            .await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(EngineError::EmptyCompletion);
        }
        Ok(answer.to_string())
    }

    async fn reply(
        &self,
        event: &Event,
        text: &str,
        image: Option<ImageAttachment>,
    ) -> Result<(), EngineError> {
        self.ctx
            .dispatcher
            .reply(
                self.ctx.social.as_ref(),
                event,
                text,
                image,
                self.ctx.config.chunk_chars,
            )
            .await?;
        Ok(())
    }

    fn log_command(
        &self,
        event: &Event,
        intent: Intent,
        outcome: CommandOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.ctx
            .db
            .insert_command_log(&event.author_id, intent.as_str(), outcome, now)?;
        Ok(())
    }
}
