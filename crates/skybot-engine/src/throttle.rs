//! Reply throttle: fortune cooldown, free-talk probability and draw cost.
//!
//! Decisions are pure. The caller applies the debit or credit a decision
//! implies, after the reply it pays for has been posted.

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use tracing::debug;

use skybot_types::{FortuneRecord, UserEconomy};

use crate::config::EngineConfig;

/// Where an author stands relative to the fortune cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownState {
    Expired,
    Active { remaining: TimeDelta },
}

impl CooldownState {
    pub fn of(latest: Option<&FortuneRecord>, cycle: TimeDelta, now: DateTime<Utc>) -> Self {
        match latest {
            None => Self::Expired,
            Some(record) => {
                let elapsed = now - record.created_at;
                if elapsed >= cycle {
                    Self::Expired
                } else {
                    Self::Active {
                        remaining: cycle - elapsed,
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FortuneDecision {
    Allow,
    /// Cooldown still running; the author pays to skip it.
    AllowWithPointSpend { cost: u32 },
    Deny { remaining: TimeDelta, points: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FreeTalkDecision {
    /// Author has not opted into free talk.
    NotFriend,
    /// Directed request paid for with points. Earns no credit.
    FriendTalk { cost: u32 },
    /// Roll succeeded. Earns one point.
    Reply { roll: f64, chance: f64 },
    Pass { roll: f64, chance: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawDecision {
    Allowed { cost: u32 },
    Insufficient { cost: u32, points: u32 },
}

/// Inputs to a free-talk decision beyond the author's economy.
#[derive(Debug, Clone, Copy)]
pub struct FreeTalkContext {
    /// The Event is aimed at the bot.
    pub directed: bool,
    pub wants_point_spend: bool,
    /// Last reply the bot sent to anyone.
    pub last_reply_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReplyThrottle {
    fortune_cycle: TimeDelta,
    fortune_point_cost: u32,
    friend_talk_cost: u32,
    draw_cost: u32,
    base_percent: f64,
    mention_bonus_percent: f64,
    idle_bonus_percent: f64,
    idle_window: TimeDelta,
}

impl ReplyThrottle {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            fortune_cycle: config.fortune_cycle(),
            fortune_point_cost: config.fortune_point_cost,
            friend_talk_cost: config.friend_talk_cost,
            draw_cost: config.draw_cost,
            base_percent: config.base_percent,
            mention_bonus_percent: config.mention_bonus_percent,
            idle_bonus_percent: config.idle_bonus_percent,
            idle_window: config.idle_window(),
        }
    }

    pub fn fortune(
        &self,
        economy: &UserEconomy,
        latest: Option<&FortuneRecord>,
        wants_point_spend: bool,
        now: DateTime<Utc>,
    ) -> FortuneDecision {
        match CooldownState::of(latest, self.fortune_cycle, now) {
            CooldownState::Expired => FortuneDecision::Allow,
            CooldownState::Active { .. }
                if wants_point_spend && economy.points >= self.fortune_point_cost =>
            {
                FortuneDecision::AllowWithPointSpend {
                    cost: self.fortune_point_cost,
                }
            }
            CooldownState::Active { remaining } => FortuneDecision::Deny {
                remaining,
                points: economy.points,
            },
        }
    }

    /// Probability of answering undirected or directed free talk, in percent.
    pub fn free_talk_chance(&self, ctx: &FreeTalkContext) -> f64 {
        let idle = match ctx.last_reply_at {
            None => true,
            Some(at) => ctx.now - at >= self.idle_window,
        };
        let mut chance = self.base_percent;
        if ctx.directed {
            chance += self.mention_bonus_percent;
        }
        if idle {
            chance += self.idle_bonus_percent;
        }
        chance
    }

    pub fn free_talk<R: Rng>(
        &self,
        economy: &UserEconomy,
        ctx: &FreeTalkContext,
        rng: &mut R,
    ) -> FreeTalkDecision {
        if !economy.mode.is_friend() {
            return FreeTalkDecision::NotFriend;
        }
        if ctx.directed && ctx.wants_point_spend && economy.points >= self.friend_talk_cost {
            return FreeTalkDecision::FriendTalk {
                cost: self.friend_talk_cost,
            };
        }

        let chance = self.free_talk_chance(ctx);
        // (0, 100], so a chance of 100 always passes.
        let roll = 100.0 - rng.random_range(0.0_f64..100.0);
        debug!(did = %economy.did, roll, chance, "Free talk roll");
        if roll <= chance {
            FreeTalkDecision::Reply { roll, chance }
        } else {
            FreeTalkDecision::Pass { roll, chance }
        }
    }

    pub fn draw(&self, economy: &UserEconomy) -> DrawDecision {
        if economy.points >= self.draw_cost {
            DrawDecision::Allowed {
                cost: self.draw_cost,
            }
        } else {
            DrawDecision::Insufficient {
                cost: self.draw_cost,
                points: economy.points,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use skybot_types::Mode;

    fn throttle() -> ReplyThrottle {
        ReplyThrottle::new(&EngineConfig::default())
    }

    fn economy(mode: Mode, points: u32) -> UserEconomy {
        let mut economy = UserEconomy::new("did:plc:alice", Utc::now());
        economy.mode = mode;
        economy.points = points;
        economy.all_points = points;
        economy
    }

    fn fortune_at(at: DateTime<Utc>) -> FortuneRecord {
        FortuneRecord {
            did: "did:plc:alice".into(),
            handle: "alice.test".into(),
            display_name: String::new(),
            created_at: at,
        }
    }

    #[test]
    fn fortune_after_the_cycle_is_always_allowed() {
        let now = Utc::now();
        let last = fortune_at(now - TimeDelta::hours(24));
        for points in [0, 3] {
            let decision = throttle().fortune(&economy(Mode::Silent, points), Some(&last), true, now);
            assert_eq!(decision, FortuneDecision::Allow);
        }
        assert_eq!(
            throttle().fortune(&economy(Mode::Silent, 0), None, false, now),
            FortuneDecision::Allow
        );
    }

    #[test]
    fn fortune_within_the_cycle_is_denied_with_remaining_time() {
        let now = Utc::now();
        let last = fortune_at(now - TimeDelta::hours(20));
        let decision = throttle().fortune(&economy(Mode::Silent, 0), Some(&last), true, now);
        assert_eq!(
            decision,
            FortuneDecision::Deny {
                remaining: TimeDelta::hours(4),
                points: 0,
            }
        );
    }

    #[test]
    fn points_buy_an_early_fortune_only_when_asked() {
        let now = Utc::now();
        let last = fortune_at(now - TimeDelta::hours(1));
        let rich = economy(Mode::Silent, 2);

        assert_eq!(
            throttle().fortune(&rich, Some(&last), true, now),
            FortuneDecision::AllowWithPointSpend { cost: 1 }
        );
        assert!(matches!(
            throttle().fortune(&rich, Some(&last), false, now),
            FortuneDecision::Deny { points: 2, .. }
        ));
    }

    #[test]
    fn free_talk_needs_friend_mode() {
        let mut rng = StdRng::seed_from_u64(7);
        let ctx = FreeTalkContext {
            directed: true,
            wants_point_spend: false,
            last_reply_at: None,
            now: Utc::now(),
        };
        for mode in [Mode::Silent, Mode::SilentStrong] {
            assert_eq!(
                throttle().free_talk(&economy(mode, 3), &ctx, &mut rng),
                FreeTalkDecision::NotFriend
            );
        }
    }

    #[test]
    fn idle_bonus_guarantees_a_reply() {
        let mut rng = StdRng::seed_from_u64(11);
        let now = Utc::now();
        let ctx = FreeTalkContext {
            directed: false,
            wants_point_spend: false,
            last_reply_at: Some(now - TimeDelta::minutes(61)),
            now,
        };
        for _ in 0..200 {
            let decision = throttle().free_talk(&economy(Mode::Friend, 3), &ctx, &mut rng);
            assert!(matches!(decision, FreeTalkDecision::Reply { .. }));
        }
    }

    #[test]
    fn chance_stacks_base_mention_and_idle_bonuses() {
        let now = Utc::now();
        let mut ctx = FreeTalkContext {
            directed: false,
            wants_point_spend: false,
            last_reply_at: Some(now - TimeDelta::minutes(5)),
            now,
        };
        assert_eq!(throttle().free_talk_chance(&ctx), 3.0);
        ctx.directed = true;
        assert_eq!(throttle().free_talk_chance(&ctx), 8.0);
        ctx.last_reply_at = None;
        assert_eq!(throttle().free_talk_chance(&ctx), 108.0);
    }

    #[test]
    fn paid_friend_talk_requires_direction_and_balance() {
        let mut rng = StdRng::seed_from_u64(3);
        let now = Utc::now();
        let ctx = FreeTalkContext {
            directed: true,
            wants_point_spend: true,
            last_reply_at: Some(now),
            now,
        };
        assert_eq!(
            throttle().free_talk(&economy(Mode::Friend, 1), &ctx, &mut rng),
            FreeTalkDecision::FriendTalk { cost: 1 }
        );
        assert!(!matches!(
            throttle().free_talk(&economy(Mode::Friend, 0), &ctx, &mut rng),
            FreeTalkDecision::FriendTalk { .. }
        ));
    }

    #[test]
    fn draw_requires_the_full_cost() {
        assert_eq!(
            throttle().draw(&economy(Mode::Silent, 4)),
            DrawDecision::Insufficient { cost: 5, points: 4 }
        );
        assert_eq!(
            throttle().draw(&economy(Mode::Silent, 5)),
            DrawDecision::Allowed { cost: 5 }
        );
    }
}
