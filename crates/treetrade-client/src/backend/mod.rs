//! The seam to the backend service: storage, identity, object storage and
//! change notification all sit behind [`Backend`].

mod local;

pub use local::LocalBackend;

use std::future::Future;

use uuid::Uuid;

use treetrade_realtime::Subscription;
use treetrade_types::api::{
    ConversationKey, MutationScope, NewListing, NewMessage, UploadProgress, UserMetadata,
};
use treetrade_types::events::Table;
use treetrade_types::models::{Conversation, Listing, ListingDraft, Message};

use crate::error::Result;

pub trait Backend: Clone + Send + Sync + 'static {
    // -- Identity --

    /// The authenticated user, if any.
    fn current_user(&self) -> Option<Uuid>;

    fn sign_out(&self) -> impl Future<Output = Result<()>> + Send;

    /// Only clearing the admin role is accepted here; granting it goes
    /// through [`Backend::elevate`].
    fn update_user_metadata(&self, metadata: UserMetadata) -> impl Future<Output = Result<()>> + Send;

    /// Verify an admin key server-side and grant the admin role on success.
    fn elevate(&self, admin_key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Whether the signed-in user's stored profile carries the admin role.
    fn is_admin(&self) -> impl Future<Output = Result<bool>> + Send;

    // -- Listings --

    /// All listings with their seller snapshot, newest first.
    fn fetch_listings(&self) -> impl Future<Output = Result<Vec<Listing>>> + Send;

    fn insert_listing(&self, listing: NewListing) -> impl Future<Output = Result<Listing>> + Send;

    /// Returns the number of rows changed.
    fn update_listing(
        &self,
        id: Uuid,
        draft: ListingDraft,
        scope: MutationScope,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Returns the number of rows removed.
    fn delete_listing(&self, id: Uuid, scope: MutationScope) -> impl Future<Output = Result<u64>> + Send;

    // -- Conversations --

    fn find_conversation(&self, key: ConversationKey) -> impl Future<Output = Result<Option<Uuid>>> + Send;

    /// Insert-if-absent; returns the id of the one conversation for `key`.
    fn insert_conversation(&self, key: ConversationKey) -> impl Future<Output = Result<Uuid>> + Send;

    fn fetch_conversations(&self, user_id: Uuid) -> impl Future<Output = Result<Vec<Conversation>>> + Send;

    // -- Messages --

    fn fetch_messages(&self, conversation_id: Uuid) -> impl Future<Output = Result<Vec<Message>>> + Send;

    fn insert_message(&self, message: NewMessage) -> impl Future<Output = Result<Message>> + Send;

    // -- Realtime --

    fn subscribe(&self, tables: &[Table]) -> Subscription;

    // -- Storage --

    /// Store an image and return its public URL.
    fn upload_image<F>(
        &self,
        path: String,
        bytes: Vec<u8>,
        progress: F,
    ) -> impl Future<Output = Result<String>> + Send
    where
        F: FnMut(UploadProgress) + Send + 'static;
}
