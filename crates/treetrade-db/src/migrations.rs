use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE profiles (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                username    TEXT NOT NULL UNIQUE,
                avatar      TEXT NOT NULL,
                is_admin    INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE listings (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES profiles(id),
                title       TEXT NOT NULL,
                description TEXT NOT NULL,
                price       TEXT NOT NULL,
                category    TEXT NOT NULL,
                condition   TEXT NOT NULL
                    CHECK (condition IN ('new', 'like-new', 'good', 'fair', 'poor')),
                images      TEXT NOT NULL DEFAULT '[]',
                location    TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                expires_at  TEXT NOT NULL
            );

            CREATE INDEX idx_listings_created ON listings(created_at);

            CREATE TABLE conversations (
                id          TEXT PRIMARY KEY,
                listing_id  TEXT NOT NULL REFERENCES listings(id) ON DELETE CASCADE,
                buyer_id    TEXT NOT NULL REFERENCES profiles(id),
                seller_id   TEXT NOT NULL REFERENCES profiles(id),
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                UNIQUE(listing_id, buyer_id, seller_id)
            );

            CREATE INDEX idx_conversations_buyer ON conversations(buyer_id);
            CREATE INDEX idx_conversations_seller ON conversations(seller_id);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                sender_id       TEXT NOT NULL REFERENCES profiles(id),
                content         TEXT NOT NULL,
                read            INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
