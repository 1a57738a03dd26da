use crate::Database;
use crate::models::{
    CommandLogRow, DialogRow, EconomyRow, FortuneRow, format_ts, parse_ts,
};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use skybot_types::{
    CommandOutcome, DialogEntry, DirectoryUser, FortuneRecord, StreamCursor, StreamKind,
    UserEconomy,
};

impl Database {
    // -- Economy --

    pub fn get_economy(&self, did: &str) -> Result<Option<UserEconomy>> {
        self.with_conn(|conn| query_economy(conn, did))
    }

    /// Fetch the author's row, creating the default one on first interaction.
    pub fn get_or_create_economy(&self, did: &str, now: DateTime<Utc>) -> Result<UserEconomy> {
        self.with_conn_mut(|conn| ensure_economy(conn, did, now))
    }

    /// Overwrite the mutable fields. `all_points` is never lowered.
    pub fn save_economy(&self, economy: &UserEconomy) -> Result<()> {
        self.with_conn_mut(|conn| write_economy(conn, economy))
    }

    /// Read-modify-write of one author's economy inside a single transaction.
    /// Nothing is written when `f` returns an error.
    pub fn update_economy<F, T>(&self, did: &str, now: DateTime<Utc>, f: F) -> Result<T>
    where
        F: FnOnce(&mut UserEconomy) -> Result<T>,
    {
        self.with_conn_mut(|conn| {
            let mut economy = ensure_economy(conn, did, now)?;
            let value = f(&mut economy)?;
            economy.updated_at = now;
            write_economy(conn, &economy)?;
            Ok(value)
        })
    }

    // -- Fortune log --

    pub fn insert_fortune(&self, record: &FortuneRecord) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO fortune_log (id, did, handle, display_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    record.did,
                    record.handle,
                    record.display_name,
                    format_ts(record.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn latest_fortune(&self, did: &str) -> Result<Option<FortuneRecord>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT did, handle, display_name, created_at FROM fortune_log
                     WHERE did = ?1
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT 1",
                    [did],
                    |row| {
                        Ok(FortuneRow {
                            did: row.get(0)?,
                            handle: row.get(1)?,
                            display_name: row.get(2)?,
                            created_at: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            row.map(FortuneRecord::try_from).transpose()
        })
    }

    pub fn fortune_count(&self, did: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM fortune_log WHERE did = ?1", [did], |r| {
                    r.get(0)
                })?;
            Ok(count as u64)
        })
    }

    // -- Dialog log --

    pub fn insert_dialog(&self, entry: &DialogEntry) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO dialog_log (id, did, role, message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    entry.did,
                    entry.role.as_str(),
                    entry.message,
                    format_ts(entry.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// The most recent `limit` entries for `did`, oldest first.
    pub fn recent_dialog(&self, did: &str, limit: u32) -> Result<Vec<DialogEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT did, role, message, created_at FROM dialog_log
                 WHERE did = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(params![did, limit], |row| {
                    Ok(DialogRow {
                        did: row.get(0)?,
                        role: row.get(1)?,
                        message: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut entries = rows
                .into_iter()
                .map(DialogEntry::try_from)
                .collect::<Result<Vec<_>>>()?;
            entries.reverse();
            Ok(entries)
        })
    }

    // -- Stream cursors --

    pub fn get_stream_cursor(&self, stream: StreamKind) -> Result<Option<StreamCursor>> {
        self.with_conn(|conn| query_stream_cursor(conn, stream))
    }

    /// Create the cursor at `at` unless one already exists, then return the stored one.
    pub fn init_stream_cursor(&self, stream: StreamKind, at: DateTime<Utc>) -> Result<StreamCursor> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO stream_cursor (stream, last_processed_at) VALUES (?1, ?2)",
                params![stream.as_str(), format_ts(at)],
            )?;
            query_stream_cursor(conn, stream)?
                .ok_or_else(|| anyhow!("Stream cursor '{}' missing after init", stream))
        })
    }

    /// Move the watermark forward. Returns false (and writes nothing) when
    /// `at` is not strictly newer than the stored value.
    pub fn advance_stream_cursor(&self, stream: StreamKind, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE stream_cursor SET last_processed_at = ?2
                 WHERE stream = ?1 AND last_processed_at < ?2",
                params![stream.as_str(), format_ts(at)],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn set_page_cursor(&self, stream: StreamKind, cursor: Option<&str>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE stream_cursor SET cursor = ?2 WHERE stream = ?1",
                params![stream.as_str(), cursor],
            )?;
            Ok(())
        })
    }

    // -- Aggregate counts --

    pub fn latest_aggregate_count(&self) -> Result<Option<u64>> {
        self.with_conn(|conn| {
            let count: Option<i64> = conn
                .query_row(
                    "SELECT count FROM aggregate_count ORDER BY created_at DESC, rowid DESC LIMIT 1",
                    [],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(count.map(|c| c as u64))
        })
    }

    pub fn insert_aggregate_count(&self, count: u64, at: DateTime<Utc>) -> Result<()> {
        let count = i64::try_from(count)?;
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO aggregate_count (id, count, created_at) VALUES (?1, ?2, ?3)",
                params![Uuid::new_v4().to_string(), count, format_ts(at)],
            )?;
            Ok(())
        })
    }

    // -- Command log --

    pub fn insert_command_log(
        &self,
        did: &str,
        command: &str,
        outcome: CommandOutcome,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO command_log (id, did, command, outcome, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    did,
                    command,
                    outcome.as_str(),
                    format_ts(at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn recent_commands(&self, did: &str, limit: u32) -> Result<Vec<CommandLogRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT did, command, outcome, created_at FROM command_log
                 WHERE did = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(params![did, limit], |row| {
                    Ok(CommandLogRow {
                        did: row.get(0)?,
                        command: row.get(1)?,
                        outcome: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// When the bot last replied to anyone.
    pub fn latest_reply_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.with_conn(|conn| {
            let raw: Option<String> = conn.query_row(
                "SELECT MAX(created_at) FROM command_log WHERE outcome = ?1",
                [CommandOutcome::Replied.as_str()],
                |r| r.get(0),
            )?;
            raw.as_deref().map(parse_ts).transpose()
        })
    }

    // -- Directory mirror --

    /// Insert directory entries, ignoring DIDs already known. Returns rows inserted.
    pub fn insert_directory_users(&self, users: &[DirectoryUser]) -> Result<usize> {
        if users.is_empty() {
            return Ok(0);
        }

        self.with_conn_mut(|conn| {
            let mut stmt = conn.prepare(
                "INSERT OR IGNORE INTO directory_users (did, handle, endpoint, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut inserted = 0;
            for user in users {
                inserted += stmt.execute(params![user.did, user.handle, user.endpoint, user.created_at])?;
            }
            Ok(inserted)
        })
    }

    pub fn last_directory_created_at(&self) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let raw: Option<String> =
                conn.query_row("SELECT MAX(created_at) FROM directory_users", [], |r| r.get(0))?;
            Ok(raw)
        })
    }

    pub fn directory_user_count(&self, endpoint: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM directory_users WHERE endpoint = ?1",
                [endpoint],
                |r| r.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Registration order (1-based) and creation time of `did` on `endpoint`.
    pub fn directory_user_info(&self, did: &str, endpoint: &str) -> Result<Option<(u64, String)>> {
        self.with_conn(|conn| {
            let created_at: Option<String> = conn
                .query_row(
                    "SELECT created_at FROM directory_users WHERE did = ?1 AND endpoint = ?2",
                    [did, endpoint],
                    |r| r.get(0),
                )
                .optional()?;

            let Some(created_at) = created_at else {
                return Ok(None);
            };

            let order: i64 = conn.query_row(
                "SELECT COUNT(*) FROM directory_users WHERE endpoint = ?1 AND created_at <= ?2",
                [endpoint, created_at.as_str()],
                |r| r.get(0),
            )?;

            Ok(Some((order as u64, created_at)))
        })
    }
}

fn query_economy(conn: &Connection, did: &str) -> Result<Option<UserEconomy>> {
    let mut stmt = conn.prepare(
        "SELECT did, mode, points, all_points, created_at, updated_at FROM user_economy WHERE did = ?1",
    )?;

    let row = stmt
        .query_row([did], |row| {
            Ok(EconomyRow {
                did: row.get(0)?,
                mode: row.get(1)?,
                points: row.get(2)?,
                all_points: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            })
        })
        .optional()?;

    row.map(UserEconomy::try_from).transpose()
}

fn ensure_economy(conn: &Connection, did: &str, now: DateTime<Utc>) -> Result<UserEconomy> {
    let now = format_ts(now);
    conn.execute(
        "INSERT OR IGNORE INTO user_economy (did, mode, points, all_points, created_at, updated_at)
         VALUES (?1, 0, 0, 0, ?2, ?2)",
        params![did, now],
    )?;
    query_economy(conn, did)?.ok_or_else(|| anyhow!("Economy row for {} missing after insert", did))
}

fn write_economy(conn: &Connection, economy: &UserEconomy) -> Result<()> {
    conn.execute(
        "INSERT INTO user_economy (did, mode, points, all_points, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(did) DO UPDATE SET
             mode = excluded.mode,
             points = excluded.points,
             all_points = MAX(user_economy.all_points, excluded.all_points),
             updated_at = excluded.updated_at",
        params![
            economy.did,
            economy.mode.as_i64(),
            economy.points,
            economy.all_points,
            format_ts(economy.created_at),
            format_ts(economy.updated_at),
        ],
    )?;
    Ok(())
}

fn query_stream_cursor(conn: &Connection, stream: StreamKind) -> Result<Option<StreamCursor>> {
    let row: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT last_processed_at, cursor FROM stream_cursor WHERE stream = ?1",
            [stream.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    row.map(|(last_processed_at, cursor)| -> Result<StreamCursor> {
        Ok(StreamCursor {
            stream,
            last_processed_at: parse_ts(&last_processed_at)?,
            cursor,
        })
    })
    .transpose()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use skybot_types::{Mode, Role};

    fn ts(raw: &str) -> DateTime<Utc> {
        raw.parse().unwrap()
    }

    #[test]
    fn economy_is_created_lazily_with_defaults() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_economy("did:plc:a").unwrap().is_none());

        let economy = db.get_or_create_economy("did:plc:a", Utc::now()).unwrap();
        assert_eq!(economy.mode, Mode::Silent);
        assert_eq!(economy.points, 0);
        assert_eq!(economy.all_points, 0);
    }

    #[test]
    fn update_economy_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.update_economy("did:plc:a", now, |e| {
            e.credit(3);
            Ok(())
        })
        .unwrap();

        let result: Result<()> = db.update_economy("did:plc:a", now, |e| {
            e.points = 0;
            Err(anyhow!("boom"))
        });
        assert!(result.is_err());
        assert_eq!(db.get_economy("did:plc:a").unwrap().unwrap().points, 3);
    }

    #[test]
    fn lifetime_points_never_decrease() {
        let db = Database::open_in_memory().unwrap();
        let mut economy = db.get_or_create_economy("did:plc:a", Utc::now()).unwrap();
        economy.credit(10);
        db.save_economy(&economy).unwrap();

        economy.all_points = 2;
        economy.points = 1;
        db.save_economy(&economy).unwrap();

        let stored = db.get_economy("did:plc:a").unwrap().unwrap();
        assert_eq!(stored.points, 1);
        assert_eq!(stored.all_points, 10);
    }

    #[test]
    fn latest_fortune_picks_newest_record() {
        let db = Database::open_in_memory().unwrap();
        for at in ["2024-01-01T00:00:00Z", "2024-01-03T00:00:00Z", "2024-01-02T00:00:00Z"] {
            db.insert_fortune(&FortuneRecord {
                did: "did:plc:a".into(),
                handle: "a.test".into(),
                display_name: String::new(),
                created_at: ts(at),
            })
            .unwrap();
        }

        let latest = db.latest_fortune("did:plc:a").unwrap().unwrap();
        assert_eq!(latest.created_at, ts("2024-01-03T00:00:00Z"));
        assert_eq!(db.fortune_count("did:plc:a").unwrap(), 3);
        assert!(db.latest_fortune("did:plc:b").unwrap().is_none());
    }

    #[test]
    fn recent_dialog_is_bounded_and_chronological() {
        let db = Database::open_in_memory().unwrap();
        let start = ts("2024-01-01T00:00:00Z");
        for i in 0..6 {
            db.insert_dialog(&DialogEntry {
                did: "did:plc:a".into(),
                role: if i % 2 == 0 { Role::User } else { Role::Assistant },
                message: format!("m{}", i),
                created_at: start + Duration::minutes(i),
            })
            .unwrap();
        }

        let window = db.recent_dialog("did:plc:a", 4).unwrap();
        let messages: Vec<_> = window.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["m2", "m3", "m4", "m5"]);
    }

    #[test]
    fn stream_cursor_refuses_regressions() {
        let db = Database::open_in_memory().unwrap();
        let first = ts("2024-01-01T00:00:00Z");
        let cursor = db.init_stream_cursor(StreamKind::Timeline, first).unwrap();
        assert_eq!(cursor.last_processed_at, first);

        // A second init keeps the stored watermark.
        let again = db.init_stream_cursor(StreamKind::Timeline, ts("2030-01-01T00:00:00Z")).unwrap();
        assert_eq!(again.last_processed_at, first);

        assert!(db.advance_stream_cursor(StreamKind::Timeline, ts("2024-01-02T00:00:00Z")).unwrap());
        assert!(!db.advance_stream_cursor(StreamKind::Timeline, ts("2024-01-01T12:00:00Z")).unwrap());
        assert!(!db.advance_stream_cursor(StreamKind::Timeline, ts("2024-01-02T00:00:00Z")).unwrap());

        db.set_page_cursor(StreamKind::Timeline, Some("page-2")).unwrap();
        let stored = db.get_stream_cursor(StreamKind::Timeline).unwrap().unwrap();
        assert_eq!(stored.last_processed_at, ts("2024-01-02T00:00:00Z"));
        assert_eq!(stored.cursor.as_deref(), Some("page-2"));
        assert!(db.get_stream_cursor(StreamKind::Notification).unwrap().is_none());
    }

    #[test]
    fn directory_order_counts_earlier_accounts() {
        let db = Database::open_in_memory().unwrap();
        let users: Vec<DirectoryUser> = (1..=3)
            .map(|i| DirectoryUser {
                did: format!("did:plc:{}", i),
                handle: format!("u{}.test", i),
                endpoint: "https://bsky.social".into(),
                created_at: format!("2023-0{}-01T00:00:00.000Z", i),
            })
            .collect();
        assert_eq!(db.insert_directory_users(&users).unwrap(), 3);
        assert_eq!(db.insert_directory_users(&users[..1]).unwrap(), 0);

        assert_eq!(db.directory_user_count("https://bsky.social").unwrap(), 3);
        let (order, created_at) = db
            .directory_user_info("did:plc:2", "https://bsky.social")
            .unwrap()
            .unwrap();
        assert_eq!(order, 2);
        assert_eq!(created_at, "2023-02-01T00:00:00.000Z");
        assert_eq!(
            db.last_directory_created_at().unwrap().as_deref(),
            Some("2023-03-01T00:00:00.000Z")
        );
    }

    #[test]
    fn latest_reply_only_counts_replies() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.latest_reply_at().unwrap().is_none());

        db.insert_command_log("did:plc:a", "free_talk", CommandOutcome::Skipped, ts("2024-01-02T00:00:00Z"))
            .unwrap();
        db.insert_command_log("did:plc:a", "fortune", CommandOutcome::Replied, ts("2024-01-01T00:00:00Z"))
            .unwrap();

        assert_eq!(db.latest_reply_at().unwrap(), Some(ts("2024-01-01T00:00:00Z")));
        assert_eq!(db.recent_commands("did:plc:a", 10).unwrap().len(), 2);
    }

    #[test]
    fn aggregate_snapshots_return_latest() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.latest_aggregate_count().unwrap(), None);
        db.insert_aggregate_count(100, ts("2024-01-01T00:00:00Z")).unwrap();
        db.insert_aggregate_count(200, ts("2024-01-02T00:00:00Z")).unwrap();
        assert_eq!(db.latest_aggregate_count().unwrap(), Some(200));
    }
}
