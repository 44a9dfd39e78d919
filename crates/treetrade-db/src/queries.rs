use crate::models::{
    ConversationRow, DeletedListing, ListingFields, ListingRow, MessageRow, ProfileRow, Scope,
};
use crate::{Database, format_timestamp};
use anyhow::{Result, anyhow, bail};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

const LISTING_SELECT: &str = "
    SELECT l.id, l.user_id, l.title, l.description, l.price, l.category, l.condition,
           l.images, l.location, l.created_at, l.expires_at,
           p.name, p.username, p.avatar
    FROM listings l
    LEFT JOIN profiles p ON p.id = l.user_id";

// Latest message per conversation is picked with correlated subqueries so a
// conversation without messages still shows up.
const CONVERSATION_SELECT: &str = "
    SELECT c.id, c.listing_id, c.buyer_id, c.seller_id, c.updated_at,
           l.title, l.images,
           b.name, b.username, b.avatar,
           s.name, s.username, s.avatar,
           (SELECT m.content FROM messages m WHERE m.conversation_id = c.id
             ORDER BY m.created_at DESC, m.rowid DESC LIMIT 1),
           (SELECT m.created_at FROM messages m WHERE m.conversation_id = c.id
             ORDER BY m.created_at DESC, m.rowid DESC LIMIT 1)
    FROM conversations c
    LEFT JOIN listings l ON l.id = c.listing_id
    LEFT JOIN profiles b ON b.id = c.buyer_id
    LEFT JOIN profiles s ON s.id = c.seller_id";

impl Database {
    // -- Profiles --

    pub fn upsert_profile(&self, id: &str, name: &str, username: &str, avatar: &str) -> Result<()> {
        let now = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, name, username, avatar, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    username = excluded.username,
                    avatar = excluded.avatar",
                params![id, name, username, avatar, now],
            )?;
            Ok(())
        })
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, username, avatar, is_admin FROM profiles WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(ProfileRow {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            username: row.get(2)?,
                            avatar: row.get(3)?,
                            is_admin: row.get::<_, i64>(4)? != 0,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Returns false if the profile does not exist.
    pub fn set_admin(&self, id: &str, is_admin: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE profiles SET is_admin = ?1 WHERE id = ?2",
                params![is_admin as i64, id],
            )?;
            Ok(rows > 0)
        })
    }

    // -- Listings --

    /// Inserts a listing; `created_at` and `expires_at` are assigned here.
    pub fn insert_listing(&self, id: &str, user_id: &str, fields: &ListingFields<'_>) -> Result<ListingRow> {
        let now = Utc::now();
        let created_at = format_timestamp(now);
        let expires_at = format_timestamp(now + self.listing_ttl());

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO listings
                    (id, user_id, title, description, price, category, condition,
                     images, location, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    id,
                    user_id,
                    fields.title,
                    fields.description,
                    fields.price,
                    fields.category,
                    fields.condition,
                    fields.images,
                    fields.location,
                    created_at,
                    expires_at,
                ],
            )?;
            query_listing(conn, id)?.ok_or_else(|| anyhow!("Listing vanished after insert: {}", id))
        })
    }

    /// Every listing joined with its seller profile, newest first.
    pub fn list_listings(&self) -> Result<Vec<ListingRow>> {
        self.with_conn(|conn| {
            let sql = format!("{} ORDER BY l.created_at DESC, l.rowid DESC", LISTING_SELECT);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], listing_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_listing(&self, id: &str) -> Result<Option<ListingRow>> {
        self.with_conn(|conn| query_listing(conn, id))
    }

    /// Returns the number of rows affected: zero when the listing does not
    /// exist or the scope excludes it.
    pub fn update_listing(&self, id: &str, fields: &ListingFields<'_>, scope: Scope<'_>) -> Result<usize> {
        self.with_conn(|conn| {
            let base = "UPDATE listings SET
                    title = ?1, description = ?2, price = ?3, category = ?4,
                    condition = ?5, images = ?6, location = ?7
                 WHERE id = ?8";
            let rows = match scope {
                Scope::Owner(user_id) => conn.execute(
                    &format!("{} AND user_id = ?9", base),
                    params![
                        fields.title,
                        fields.description,
                        fields.price,
                        fields.category,
                        fields.condition,
                        fields.images,
                        fields.location,
                        id,
                        user_id,
                    ],
                )?,
                Scope::Any => conn.execute(
                    base,
                    params![
                        fields.title,
                        fields.description,
                        fields.price,
                        fields.category,
                        fields.condition,
                        fields.images,
                        fields.location,
                        id,
                    ],
                )?,
            };
            Ok(rows)
        })
    }

    /// Deletes a listing and, by cascade, its conversations and messages.
    pub fn delete_listing(&self, id: &str, scope: Scope<'_>) -> Result<DeletedListing> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let mut conversation_ids = {
                let mut stmt = tx.prepare("SELECT id FROM conversations WHERE listing_id = ?1")?;
                stmt.query_map([id], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };

            let rows = match scope {
                Scope::Owner(user_id) => tx.execute(
                    "DELETE FROM listings WHERE id = ?1 AND user_id = ?2",
                    params![id, user_id],
                )?,
                Scope::Any => tx.execute("DELETE FROM listings WHERE id = ?1", [id])?,
            };

            if rows == 0 {
                conversation_ids.clear();
            }

            tx.commit()?;
            Ok(DeletedListing { rows, conversation_ids })
        })
    }

    // -- Conversations --

    pub fn find_conversation(&self, listing_id: &str, buyer_id: &str, seller_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| query_conversation_id(conn, listing_id, buyer_id, seller_id))
    }

    /// Atomic insert-if-absent on the (listing, buyer, seller) triple.
    /// Returns the id of the surviving row and whether this call created it.
    pub fn insert_conversation_if_absent(
        &self,
        id: &str,
        listing_id: &str,
        buyer_id: &str,
        seller_id: &str,
    ) -> Result<(String, bool)> {
        let now = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO conversations (id, listing_id, buyer_id, seller_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(listing_id, buyer_id, seller_id) DO NOTHING",
                params![id, listing_id, buyer_id, seller_id, now],
            )?;

            let existing = query_conversation_id(conn, listing_id, buyer_id, seller_id)?
                .ok_or_else(|| anyhow!("Conversation missing after upsert for listing {}", listing_id))?;

            Ok((existing, inserted == 1))
        })
    }

    /// Conversations the user takes part in, most recently active first.
    pub fn list_conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE c.buyer_id = ?1 OR c.seller_id = ?1 ORDER BY c.updated_at DESC, c.rowid DESC",
                CONVERSATION_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE c.id = ?1", CONVERSATION_SELECT);
            let row = conn.query_row(&sql, [id], conversation_from_row).optional()?;
            Ok(row)
        })
    }

    // -- Messages --

    /// Appends a message and bumps the conversation's `updated_at`.
    /// The sender must be one of the two participants.
    pub fn insert_message(&self, id: &str, conversation_id: &str, sender_id: &str, content: &str) -> Result<MessageRow> {
        let created_at = format_timestamp(Utc::now());
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let participants: Option<(String, String)> = tx
                .query_row(
                    "SELECT buyer_id, seller_id FROM conversations WHERE id = ?1",
                    [conversation_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((buyer_id, seller_id)) = participants else {
                bail!("Conversation not found: {}", conversation_id);
            };
            if sender_id != buyer_id && sender_id != seller_id {
                bail!("User {} is not a participant of conversation {}", sender_id, conversation_id);
            }

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, conversation_id, sender_id, content, created_at],
            )?;
            tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![created_at, conversation_id],
            )?;
            tx.commit()?;

            Ok(MessageRow {
                id: id.to_string(),
                conversation_id: conversation_id.to_string(),
                sender_id: sender_id.to_string(),
                content: content.to_string(),
                read: false,
                created_at,
            })
        })
    }

    /// All messages of a conversation, oldest first.
    pub fn get_messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender_id, content, read, created_at
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;

            let rows = stmt
                .query_map([conversation_id], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        content: row.get(3)?,
                        read: row.get::<_, i64>(4)? != 0,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_listing(conn: &Connection, id: &str) -> Result<Option<ListingRow>> {
    let sql = format!("{} WHERE l.id = ?1", LISTING_SELECT);
    let row = conn.query_row(&sql, [id], listing_from_row).optional()?;
    Ok(row)
}

fn query_conversation_id(
    conn: &Connection,
    listing_id: &str,
    buyer_id: &str,
    seller_id: &str,
) -> Result<Option<String>> {
    let id = conn
        .query_row(
            "SELECT id FROM conversations WHERE listing_id = ?1 AND buyer_id = ?2 AND seller_id = ?3",
            params![listing_id, buyer_id, seller_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<ListingRow> {
    Ok(ListingRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        price: row.get(4)?,
        category: row.get(5)?,
        condition: row.get(6)?,
        images: row.get(7)?,
        location: row.get(8)?,
        created_at: row.get(9)?,
        expires_at: row.get(10)?,
        seller_name: row.get(11)?,
        seller_username: row.get(12)?,
        seller_avatar: row.get(13)?,
    })
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        listing_id: row.get(1)?,
        buyer_id: row.get(2)?,
        seller_id: row.get(3)?,
        updated_at: row.get(4)?,
        listing_title: row.get(5)?,
        listing_images: row.get(6)?,
        buyer_name: row.get(7)?,
        buyer_username: row.get(8)?,
        buyer_avatar: row.get(9)?,
        seller_name: row.get(10)?,
        seller_username: row.get(11)?,
        seller_avatar: row.get(12)?,
        last_message_content: row.get(13)?,
        last_message_at: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "00000000-0000-0000-0000-00000000000a";
    const BOB: &str = "00000000-0000-0000-0000-00000000000b";
    const CAROL: &str = "00000000-0000-0000-0000-00000000000c";

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_profile(ALICE, "Alice", "alice", "a.png").unwrap();
        db.upsert_profile(BOB, "Bob", "bob", "b.png").unwrap();
        db.upsert_profile(CAROL, "Carol", "carol", "c.png").unwrap();
        db
    }

    fn lamp() -> ListingFields<'static> {
        ListingFields {
            title: "Desk Lamp",
            description: "Bright",
            price: "15",
            category: "Electronics",
            condition: "good",
            images: "[]",
            location: r#"{"lat":37.4,"lng":-122.1}"#,
        }
    }

    #[test]
    fn listing_insert_joins_seller_and_sets_expiry() {
        let db = seeded();
        let row = db.insert_listing("l1", ALICE, &lamp()).unwrap();
        assert_eq!(row.seller_username.as_deref(), Some("alice"));
        assert_eq!(row.seller_avatar.as_deref(), Some("a.png"));

        let created = crate::parse_timestamp(&row.created_at).unwrap();
        let expires = crate::parse_timestamp(&row.expires_at).unwrap();
        assert_eq!(expires - created, db.listing_ttl());
    }

    #[test]
    fn listings_are_newest_first() {
        let db = seeded();
        db.insert_listing("l1", ALICE, &lamp()).unwrap();
        db.insert_listing("l2", BOB, &lamp()).unwrap();
        let ids: Vec<String> = db.list_listings().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["l2", "l1"]);
    }

    #[test]
    fn owner_scope_blocks_other_users() {
        let db = seeded();
        db.insert_listing("l1", ALICE, &lamp()).unwrap();

        let mut edit = lamp();
        edit.price = "12";
        assert_eq!(db.update_listing("l1", &edit, Scope::Owner(BOB)).unwrap(), 0);
        assert_eq!(db.update_listing("l1", &edit, Scope::Owner(ALICE)).unwrap(), 1);
        assert_eq!(db.get_listing("l1").unwrap().unwrap().price, "12");

        assert_eq!(db.delete_listing("l1", Scope::Owner(BOB)).unwrap().rows, 0);
        assert_eq!(db.delete_listing("l1", Scope::Any).unwrap().rows, 1);
        assert!(db.get_listing("l1").unwrap().is_none());
    }

    #[test]
    fn conversation_upsert_is_idempotent() {
        let db = seeded();
        db.insert_listing("l1", ALICE, &lamp()).unwrap();

        let (first, created) = db.insert_conversation_if_absent("c1", "l1", BOB, ALICE).unwrap();
        assert!(created);
        let (second, created) = db.insert_conversation_if_absent("c2", "l1", BOB, ALICE).unwrap();
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(db.find_conversation("l1", BOB, ALICE).unwrap().as_deref(), Some("c1"));
        assert!(db.find_conversation("l1", CAROL, ALICE).unwrap().is_none());
    }

    #[test]
    fn conversation_list_carries_joins_and_last_message() {
        let db = seeded();
        db.insert_listing("l1", ALICE, &lamp()).unwrap();
        db.insert_listing("l2", ALICE, &lamp()).unwrap();
        db.insert_conversation_if_absent("c1", "l1", BOB, ALICE).unwrap();
        db.insert_conversation_if_absent("c2", "l2", CAROL, ALICE).unwrap();

        db.insert_message("m1", "c1", BOB, "Is this available?").unwrap();
        db.insert_message("m2", "c1", ALICE, "Yes").unwrap();

        let rows = db.list_conversations_for_user(ALICE).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "c1");
        assert_eq!(rows[0].last_message_content.as_deref(), Some("Yes"));
        assert_eq!(rows[0].buyer_username.as_deref(), Some("bob"));
        assert_eq!(rows[0].listing_title.as_deref(), Some("Desk Lamp"));
        assert!(rows[1].last_message_content.is_none());

        assert_eq!(db.list_conversations_for_user(BOB).unwrap().len(), 1);
    }

    #[test]
    fn messages_come_back_oldest_first() {
        let db = seeded();
        db.insert_listing("l1", ALICE, &lamp()).unwrap();
        db.insert_conversation_if_absent("c1", "l1", BOB, ALICE).unwrap();
        for (i, text) in ["one", "two", "three"].iter().enumerate() {
            db.insert_message(&format!("m{}", i), "c1", BOB, text).unwrap();
        }
        let contents: Vec<String> = db.get_messages("c1").unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[test]
    fn outsiders_and_unknown_conversations_are_rejected() {
        let db = seeded();
        db.insert_listing("l1", ALICE, &lamp()).unwrap();
        db.insert_conversation_if_absent("c1", "l1", BOB, ALICE).unwrap();
        assert!(db.insert_message("m1", "c1", CAROL, "hi").is_err());
        assert!(db.insert_message("m1", "nope", BOB, "hi").is_err());
        assert!(db.get_messages("c1").unwrap().is_empty());
    }

    #[test]
    fn deleting_a_listing_cascades() {
        let db = seeded();
        db.insert_listing("l1", ALICE, &lamp()).unwrap();
        db.insert_conversation_if_absent("c1", "l1", BOB, ALICE).unwrap();
        db.insert_message("m1", "c1", BOB, "hi").unwrap();

        let deleted = db.delete_listing("l1", Scope::Owner(ALICE)).unwrap();
        assert_eq!(deleted.rows, 1);
        assert_eq!(deleted.conversation_ids, vec!["c1".to_string()]);
        assert!(db.get_conversation("c1").unwrap().is_none());
        assert!(db.get_messages("c1").unwrap().is_empty());
    }
}
