use tracing::{debug, error, info};
use uuid::Uuid;

use treetrade_types::api::NewListing;
use treetrade_types::models::{Listing, ListingDraft};

use crate::backend::Backend;
use crate::error::{ClientError, Result};
use crate::session::Session;

/// Client-side snapshot of every listing, joined with its seller.
///
/// Every successful mutation is followed by a full re-fetch; nothing is
/// patched in place.
pub struct ListingStore<B> {
    backend: B,
    listings: Vec<Listing>,
}

impl<B: Backend> ListingStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            listings: Vec::new(),
        }
    }

    pub fn listings(&self) -> &[Listing] {
        &self.listings
    }

    pub fn get(&self, id: Uuid) -> Option<&Listing> {
        self.listings.iter().find(|l| l.id == id)
    }

    /// Replace the snapshot. On failure the previous one stays.
    pub async fn refresh(&mut self) {
        match self.backend.fetch_listings().await {
            Ok(listings) => {
                debug!("Fetched {} listings", listings.len());
                self.listings = listings;
            }
            Err(e) => error!("Error fetching listings: {}", e),
        }
    }

    pub async fn create(&mut self, session: &Session, draft: ListingDraft) -> Result<Listing> {
        let user_id = session.require_user()?;
        draft.validate().map_err(ClientError::Validation)?;

        let listing = self
            .backend
            .insert_listing(NewListing { user_id, draft })
            .await
            .inspect_err(|e| error!("Error creating listing: {}", e))?;

        info!("Posted listing {} '{}'", listing.id, listing.title);
        self.refresh().await;
        Ok(listing)
    }

    pub async fn update(&mut self, session: &Session, id: Uuid, draft: ListingDraft) -> Result<()> {
        let scope = session.scope_for(self.owner_of(id))?;
        draft.validate().map_err(ClientError::Validation)?;

        let rows = self
            .backend
            .update_listing(id, draft, scope)
            .await
            .inspect_err(|e| error!("Error updating listing {}: {}", id, e))?;
        if rows == 0 {
            return Err(ClientError::Forbidden(format!("listing {} was not updated", id)));
        }

        self.refresh().await;
        Ok(())
    }

    pub async fn delete(&mut self, session: &Session, id: Uuid) -> Result<()> {
        let scope = session.scope_for(self.owner_of(id))?;

        let rows = self
            .backend
            .delete_listing(id, scope)
            .await
            .inspect_err(|e| error!("Error deleting listing {}: {}", id, e))?;
        if rows == 0 {
            return Err(ClientError::Forbidden(format!("listing {} was not deleted", id)));
        }

        info!("Deleted listing {}", id);
        self.refresh().await;
        Ok(())
    }

    fn owner_of(&self, id: Uuid) -> Option<Uuid> {
        self.get(id).map(|l| l.user_id)
    }

    /// Case-insensitive match on title, description or category.
    pub fn search(&self, query: &str) -> Vec<&Listing> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.listings.iter().collect();
        }

        self.listings
            .iter()
            .filter(|l| {
                l.title.to_lowercase().contains(&needle)
                    || l.description.to_lowercase().contains(&needle)
                    || l.category.to_lowercase().contains(&needle)
            })
            .collect()
    }
}
