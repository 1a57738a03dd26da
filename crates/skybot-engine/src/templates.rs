//! Prompt and reply text.

use chrono::TimeDelta;

use skybot_types::{FamiliarityTier, Mode, UserEconomy};

/// System prompt for every generation: persona, relationship depth and
/// the reply length constraint.
pub fn system_prompt(persona: &str, tier: FamiliarityTier) -> String {
    format!(
        "{persona}\n{}\nStay in character and answer the next message in 30 to 200 characters.",
        tier.prompt_hint()
    )
}

pub fn fortune_request(user_text: &str) -> String {
    format!(
        "Tell my fortune for today. Decide the result at random and follow it: rate my luck \
         with one to five ★, and include a lucky item and a lucky colour. {user_text}"
    )
}

pub fn draw_request(user_text: &str) -> String {
    format!(
        "Draw what is asked below as a single self-contained SVG document with a width and \
         height of 512. Reply with the SVG only, no commentary.\n{user_text}"
    )
}

/// First `<svg ...>...</svg>` span in a completion, if any.
pub fn extract_svg(completion: &str) -> Option<&str> {
    let start = completion.find("<svg")?;
    let rest = &completion[start..];
    let end = rest.find("</svg>")? + "</svg>".len();
    Some(&rest[..end])
}

/// `HH:MM:SS`, hours unbounded, never negative.
pub fn format_remaining(remaining: TimeDelta) -> String {
    let secs = remaining.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

pub fn fortune_cooldown(cycle_hours: i64, remaining: TimeDelta, points: u32, cost: u32) -> String {
    format!(
        "Fortunes are once every {cycle_hours} hours. Please wait about {} more.\n\
         You have {points} point(s); add \"point\" to your request to spend {cost} and skip the wait.",
        format_remaining(remaining)
    )
}

pub fn draw_insufficient(cost: u32, points: u32) -> String {
    format!("A drawing costs {cost} points, but you only have {points}. Let's talk a little more first.")
}

pub fn draw_failed() -> String {
    "I tried, but the picture didn't come out right. No points were used.".to_string()
}

pub fn draw_caption(user_text: &str) -> String {
    let subject: String = user_text.chars().take(100).collect();
    format!("Here is your picture!\n{subject}")
}

pub fn status_report(
    handle: &str,
    directory: Option<(u64, String)>,
    economy: &UserEconomy,
    tier: FamiliarityTier,
) -> String {
    let mut text = format!("Status for @{handle}\n");
    match directory {
        Some((order, created_at)) => {
            text.push_str(&format!(
                "You are account #{order} here, created at {created_at} (UTC).\n"
            ));
        }
        None => text.push_str("I couldn't find your account in the directory yet.\n"),
    }
    text.push_str(&format!(
        "Mode: {}\nPoints: {} (lifetime {})\nFamiliarity: {}",
        mode_label(economy.mode),
        economy.points,
        economy.all_points,
        tier.label()
    ));
    text
}

pub fn mode_label(mode: Mode) -> &'static str {
    match mode {
        Mode::Friend => "friend",
        Mode::Silent => "silent",
        Mode::SilentStrong => "silent (strong)",
    }
}

pub fn friend_confirmed() -> String {
    "We're friends now! I'll chime in on your posts from time to time.".to_string()
}

pub fn silent_confirmed(mode: Mode) -> String {
    match mode {
        Mode::SilentStrong => {
            "Understood. I'll stay completely quiet until you call me a friend again.".to_string()
        }
        _ => "Understood. I'll only answer when you ask me something directly.".to_string(),
    }
}

/// Milestone announcement for a registered-user count.
pub fn milestone_message(count: u64, step: u64) -> String {
    let step = step.max(1);
    if count % step.saturating_mul(100) == 0 {
        format!("Look, everyone! We have finally reached {count} users! This is all thanks to you!")
    } else if count % step.saturating_mul(10) == 0 {
        format!("We now have {count} users. Wonderful!")
    } else {
        format!("We now have {count} users.")
    }
}
