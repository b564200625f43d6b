use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id           TEXT PRIMARY KEY,
            username     TEXT NOT NULL UNIQUE,
            password     TEXT NOT NULL,
            friend_code  TEXT NOT NULL UNIQUE,
            avatar_url   TEXT,
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- A friendship is two directed rows (A->B and B->A), created and
        -- destroyed atomically in pairs so lookups stay single-row.
        CREATE TABLE IF NOT EXISTS friends (
            user_id     TEXT NOT NULL REFERENCES users(id),
            friend_id   TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (user_id, friend_id)
        );

        CREATE TABLE IF NOT EXISTS friend_requests (
            id           TEXT PRIMARY KEY,
            sender_id    TEXT NOT NULL REFERENCES users(id),
            receiver_id  TEXT NOT NULL REFERENCES users(id),
            created_at   TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(sender_id, receiver_id)
        );

        CREATE INDEX IF NOT EXISTS idx_friend_requests_receiver
            ON friend_requests(receiver_id);

        CREATE TABLE IF NOT EXISTS blocks (
            blocker_id  TEXT NOT NULL REFERENCES users(id),
            blocked_id  TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (blocker_id, blocked_id)
        );

        -- Local hide marker; the underlying messages are retained.
        CREATE TABLE IF NOT EXISTS deleted_chats (
            user_id        TEXT NOT NULL REFERENCES users(id),
            other_user_id  TEXT NOT NULL REFERENCES users(id),
            deleted_at     TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (user_id, other_user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id           TEXT PRIMARY KEY,
            sender_id    TEXT NOT NULL REFERENCES users(id),
            receiver_id  TEXT NOT NULL REFERENCES users(id),
            kind         TEXT NOT NULL DEFAULT 'text',
            content      TEXT,
            media_url    TEXT,
            status       TEXT NOT NULL DEFAULT 'sent',
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, receiver_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
