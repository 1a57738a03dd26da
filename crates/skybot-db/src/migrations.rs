use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (economy, logs, cursors)");
        conn.execute_batch(
            "
            CREATE TABLE user_economy (
                did         TEXT PRIMARY KEY,
                mode        INTEGER NOT NULL DEFAULT 0,
                points      INTEGER NOT NULL DEFAULT 0 CHECK (points >= 0),
                all_points  INTEGER NOT NULL DEFAULT 0 CHECK (all_points >= 0),
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE TABLE fortune_log (
                id            TEXT PRIMARY KEY,
                did           TEXT NOT NULL,
                handle        TEXT NOT NULL,
                display_name  TEXT NOT NULL DEFAULT '',
                created_at    TEXT NOT NULL
            );

            CREATE INDEX idx_fortune_log_did
                ON fortune_log(did, created_at);

            CREATE TABLE dialog_log (
                id          TEXT PRIMARY KEY,
                did         TEXT NOT NULL,
                role        TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                message     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_dialog_log_did
                ON dialog_log(did, created_at);

            CREATE TABLE stream_cursor (
                stream             TEXT PRIMARY KEY,
                last_processed_at  TEXT NOT NULL,
                cursor             TEXT
            );

            CREATE TABLE aggregate_count (
                id          TEXT PRIMARY KEY,
                count       INTEGER NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE command_log (
                id          TEXT PRIMARY KEY,
                did         TEXT NOT NULL,
                command     TEXT NOT NULL,
                outcome     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_command_log_did
                ON command_log(did, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (directory mirror)");
        conn.execute_batch(
            "
            CREATE TABLE directory_users (
                did         TEXT PRIMARY KEY,
                handle      TEXT NOT NULL,
                endpoint    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_directory_users_endpoint
                ON directory_users(endpoint, created_at);

            CREATE INDEX idx_directory_users_created
                ON directory_users(created_at);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 2);
    }
}
