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
        info!("Running migration v1 (chat schema)");
        conn.execute_batch(
            "
            -- Owned by the profile subsystem; chat only reads it.
            CREATE TABLE IF NOT EXISTS profiles (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                full_name   TEXT,
                avatar_url  TEXT
            );

            CREATE TABLE IF NOT EXISTS chats (
                id                  TEXT PRIMARY KEY,
                is_group            INTEGER NOT NULL DEFAULT 0,
                group_name          TEXT,
                group_description   TEXT,
                group_avatar_url    TEXT,
                created_by          TEXT NOT NULL,
                created_at          TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_members (
                chat_id     TEXT NOT NULL REFERENCES chats(id),
                user_id     TEXT NOT NULL,
                joined_at   TEXT NOT NULL,
                PRIMARY KEY (chat_id, user_id)
            );

            CREATE INDEX IF NOT EXISTS idx_chat_members_user
                ON chat_members(user_id);

            CREATE TABLE IF NOT EXISTS messages (
                id          TEXT PRIMARY KEY,
                chat_id     TEXT NOT NULL REFERENCES chats(id),
                user_id     TEXT NOT NULL,
                content     TEXT NOT NULL DEFAULT '',
                file_url    TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_chat
                ON messages(chat_id, created_at);

            CREATE TABLE IF NOT EXISTS typing_status (
                id          TEXT PRIMARY KEY,
                chat_id     TEXT NOT NULL REFERENCES chats(id),
                user_id     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_typing_status_chat
                ON typing_status(chat_id, created_at);

            CREATE TABLE IF NOT EXISTS notifications (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                sender_id   TEXT NOT NULL,
                kind        TEXT NOT NULL,
                message     TEXT NOT NULL,
                chat_id     TEXT REFERENCES chats(id),
                post_id     TEXT,
                comment_id  TEXT,
                is_read     INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_user
                ON notifications(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_notifications_chat
                ON notifications(chat_id);

            -- In-progress chat deletions, so an interrupted one can be resumed.
            CREATE TABLE IF NOT EXISTS chat_deletions (
                chat_id         TEXT PRIMARY KEY,
                requested_by    TEXT NOT NULL,
                started_at      TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
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

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }
}
