use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ListingDraft;

// -- Listings --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewListing {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub draft: ListingDraft,
}

/// Ownership predicate applied to listing updates and deletes.
/// `Any` is honored only for callers the backend knows to be admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "user_id", rename_all = "snake_case")]
pub enum MutationScope {
    Owner(Uuid),
    Any,
}

// -- Conversations --

/// The (listing, buyer, seller) triple identifying at most one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
}

// -- Identity --

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UserMetadata {
    pub is_admin: bool,
}

// -- Storage --

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub loaded: u64,
    pub total: u64,
}

impl UploadProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.loaded as f64 / self.total as f64 * 100.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub path: String,
    pub public_url: String,
    pub size: u64,
}
