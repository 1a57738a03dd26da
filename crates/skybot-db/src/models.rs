//! Database row types. These map directly to SQLite rows and keep
//! timestamps as stored text; conversion into `skybot-types` models
//! parses them and fails on corrupt values.

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use skybot_types::{DialogEntry, FortuneRecord, Mode, Role, UserEconomy};

/// Fixed-width RFC 3339 so lexical order matches chronological order.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') stores "YYYY-MM-DD HH:MM:SS" without timezone.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").map(|ndt| ndt.and_utc())
        })
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))
}

pub struct EconomyRow {
    pub did: String,
    pub mode: i64,
    pub points: u32,
    pub all_points: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<EconomyRow> for UserEconomy {
    type Error = anyhow::Error;

    fn try_from(row: EconomyRow) -> Result<Self> {
        Ok(UserEconomy {
            mode: Mode::from_i64(row.mode),
            points: row.points,
            all_points: row.all_points,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
            did: row.did,
        })
    }
}

pub struct FortuneRow {
    pub did: String,
    pub handle: String,
    pub display_name: String,
    pub created_at: String,
}

impl TryFrom<FortuneRow> for FortuneRecord {
    type Error = anyhow::Error;

    fn try_from(row: FortuneRow) -> Result<Self> {
        Ok(FortuneRecord {
            created_at: parse_ts(&row.created_at)?,
            did: row.did,
            handle: row.handle,
            display_name: row.display_name,
        })
    }
}

pub struct DialogRow {
    pub did: String,
    pub role: String,
    pub message: String,
    pub created_at: String,
}

impl TryFrom<DialogRow> for DialogEntry {
    type Error = anyhow::Error;

    fn try_from(row: DialogRow) -> Result<Self> {
        let role = Role::parse(&row.role).ok_or_else(|| anyhow!("Unknown dialog role '{}'", row.role))?;
        Ok(DialogEntry {
            created_at: parse_ts(&row.created_at)?,
            did: row.did,
            role,
            message: row.message,
        })
    }
}

pub struct CommandLogRow {
    pub did: String,
    pub command: String,
    pub outcome: String,
    pub created_at: String,
}
