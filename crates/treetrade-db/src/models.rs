//! Database row types. These map directly to SQLite rows.
//! Distinct from treetrade-types models to keep the DB layer independent.

pub struct ProfileRow {
    pub id: String,
    pub name: String,
    pub username: String,
    pub avatar: String,
    pub is_admin: bool,
}

/// Listing joined with its owner's profile. Profile columns are `None`
/// when the join finds nothing.
pub struct ListingRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub price: String,
    pub category: String,
    pub condition: String,
    pub images: String,
    pub location: String,
    pub created_at: String,
    pub expires_at: String,
    pub seller_name: Option<String>,
    pub seller_username: Option<String>,
    pub seller_avatar: Option<String>,
}

/// Writable listing columns. `images` and `location` are JSON text.
pub struct ListingFields<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub price: &'a str,
    pub category: &'a str,
    pub condition: &'a str,
    pub images: &'a str,
    pub location: &'a str,
}

/// Ownership predicate for listing updates and deletes.
pub enum Scope<'a> {
    Owner(&'a str),
    Any,
}

pub struct DeletedListing {
    pub rows: usize,
    /// Conversations removed by the cascade.
    pub conversation_ids: Vec<String>,
}

pub struct ConversationRow {
    pub id: String,
    pub listing_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub updated_at: String,
    pub listing_title: Option<String>,
    pub listing_images: Option<String>,
    pub buyer_name: Option<String>,
    pub buyer_username: Option<String>,
    pub buyer_avatar: Option<String>,
    pub seller_name: Option<String>,
    pub seller_username: Option<String>,
    pub seller_avatar: Option<String>,
    pub last_message_content: Option<String>,
    pub last_message_at: Option<String>,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub read: bool,
    pub created_at: String,
}
