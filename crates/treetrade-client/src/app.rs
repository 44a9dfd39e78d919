use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use treetrade_types::models::{Listing, ListingDraft};

use crate::backend::Backend;
use crate::error::{ClientError, Result};
use crate::listings::ListingStore;
use crate::live::Inbox;
use crate::map::{self, MapPin};
use crate::messaging::ConversationGateway;
use crate::session::Session;
use crate::upload::ImageUpload;

/// The user flows of the marketplace over one backend and session.
pub struct Marketplace<B> {
    backend: B,
    session: Session,
    listings: ListingStore<B>,
    upload: ImageUpload,
    poll_interval: Duration,
}

impl<B: Backend> Marketplace<B> {
    pub fn new(backend: B, session: Session, poll_interval: Duration) -> Self {
        Self {
            listings: ListingStore::new(backend.clone()),
            backend,
            session,
            upload: ImageUpload::new(),
            poll_interval,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn listings(&self) -> &ListingStore<B> {
        &self.listings
    }

    pub fn upload(&self) -> &ImageUpload {
        &self.upload
    }

    pub fn pins(&self) -> Vec<MapPin> {
        map::pins(self.listings.listings())
    }

    pub async fn refresh(&mut self) {
        self.listings.refresh().await;
    }

    pub async fn post_listing(&mut self, draft: ListingDraft) -> Result<Listing> {
        self.listings.create(&self.session, draft).await
    }

    pub async fn edit_listing(&mut self, id: Uuid, draft: ListingDraft) -> Result<()> {
        self.listings.update(&self.session, id, draft).await
    }

    pub async fn delete_listing(&mut self, id: Uuid) -> Result<()> {
        self.listings.delete(&self.session, id).await
    }

    /// Upload an image and make it the draft's picture.
    pub async fn attach_image(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
        draft: &mut ListingDraft,
    ) -> Result<String> {
        self.upload
            .upload(&self.backend, file_name, content_type, bytes, draft)
            .await
    }

    /// Find or start the conversation with a listing's seller and open the
    /// inbox on it.
    pub async fn message_seller(&self, listing_id: Uuid) -> Result<Inbox<B>> {
        let listing = self
            .listings
            .get(listing_id)
            .ok_or_else(|| ClientError::NotFound(format!("listing {}", listing_id)))?;

        let gateway = ConversationGateway::new(self.backend.clone());
        let conversation_id = gateway
            .resolve_or_create_conversation(&self.session, listing)
            .await?;
        info!("Messaging seller of '{}' in {}", listing.title, conversation_id);

        Inbox::open(
            self.backend.clone(),
            &self.session,
            self.poll_interval,
            Some(listing_id),
        )
        .await
    }

    pub async fn open_inbox(&self) -> Result<Inbox<B>> {
        Inbox::open(self.backend.clone(), &self.session, self.poll_interval, None).await
    }

    pub async fn enter_admin(&mut self, admin_key: &str) -> Result<()> {
        self.session.enter_admin(&self.backend, admin_key).await
    }

    /// Check a persisted admin flag against the backend role.
    pub async fn sync_role(&mut self) -> Result<()> {
        self.session.sync_role(&self.backend).await
    }

    pub async fn exit_admin(&mut self) -> Result<()> {
        self.session.exit_admin(&self.backend).await
    }

    pub async fn sign_out(&mut self) -> Result<()> {
        self.session.sign_out(&self.backend).await
    }
}
