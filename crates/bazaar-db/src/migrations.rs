use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Read-only projection of the user directory service.
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name  TEXT NOT NULL,
            last_name   TEXT NOT NULL
        );

        -- Read-only projection of the listings service.
        CREATE TABLE IF NOT EXISTS posts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            title       TEXT NOT NULL,
            author_id   INTEGER NOT NULL REFERENCES users(id),
            archived    INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS chats (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id         INTEGER REFERENCES posts(id),
            seller_id       INTEGER NOT NULL REFERENCES users(id),
            buyer_id        INTEGER NOT NULL REFERENCES users(id),
            last_update     INTEGER NOT NULL,
            seller_unread   INTEGER NOT NULL DEFAULT 0 CHECK (seller_unread >= 0),
            buyer_unread    INTEGER NOT NULL DEFAULT 0 CHECK (buyer_unread >= 0)
        );

        -- At most one chat per (buyer, post); general-inquiry chats
        -- (post_id IS NULL) are exempt.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_chats_buyer_post
            ON chats(buyer_id, post_id) WHERE post_id IS NOT NULL;

        CREATE INDEX IF NOT EXISTS idx_chats_seller ON chats(seller_id);
        CREATE INDEX IF NOT EXISTS idx_chats_buyer ON chats(buyer_id);

        CREATE TABLE IF NOT EXISTS chat_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id     INTEGER NOT NULL REFERENCES chats(id),
            author_id   INTEGER NOT NULL REFERENCES users(id),
            message     TEXT NOT NULL DEFAULT '',
            image       TEXT,
            timestamp   INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON chat_messages(chat_id, id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
