use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use treetrade_types::api::{MutationScope, UserMetadata};
use treetrade_types::models::Listing;

use crate::backend::Backend;
use crate::error::{ClientError, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    admin_mode: bool,
}

/// Where the admin-mode flag survives between runs.
#[derive(Debug, Clone)]
pub struct AdminStore {
    path: Option<PathBuf>,
}

impl AdminStore {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self { path: Some(path.into()) }
    }

    /// Nothing is persisted.
    pub fn memory() -> Self {
        Self { path: None }
    }

    /// Missing or unreadable state counts as "not in admin mode".
    pub fn load(&self) -> bool {
        let Some(path) = &self.path else {
            return false;
        };
        if !path.exists() {
            return false;
        }

        let parsed = std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| Ok(serde_json::from_str::<PersistedState>(&raw)?));
        match parsed {
            Ok(state) => {
                debug!("Loaded admin_mode={} from {}", state.admin_mode, path.display());
                state.admin_mode
            }
            Err(e) => {
                warn!("Ignoring unreadable state file {}: {}", path.display(), e);
                false
            }
        }
    }

    pub fn save(&self, admin_mode: bool) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let json = serde_json::to_string_pretty(&PersistedState { admin_mode })
            .context("Failed to serialize state")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Authorization context handed to everything that makes ownership
/// decisions. The admin flag here only decides what the UI offers and which
/// scope is requested; the backend checks the role itself.
#[derive(Debug, Clone)]
pub struct Session {
    user_id: Option<Uuid>,
    admin: bool,
    store: AdminStore,
}

impl Session {
    pub fn new(user_id: Option<Uuid>, store: AdminStore) -> Self {
        let admin = user_id.is_some() && store.load();
        Self { user_id, admin, store }
    }

    pub fn for_backend<B: Backend>(backend: &B, store: AdminStore) -> Self {
        Self::new(backend.current_user(), store)
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    pub fn require_user(&self) -> Result<Uuid> {
        self.user_id.ok_or(ClientError::NotSignedIn)
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }

    /// Drop a persisted admin flag the backend no longer backs with the role.
    pub async fn sync_role<B: Backend>(&mut self, backend: &B) -> Result<()> {
        if !self.admin || self.user_id.is_none() {
            return Ok(());
        }
        if backend.is_admin().await? {
            return Ok(());
        }

        warn!("Stored admin mode has no matching role; leaving admin mode");
        self.admin = false;
        if let Err(e) = self.store.save(false) {
            warn!("Failed to persist admin mode: {}", e);
        }
        Ok(())
    }

    /// Ownership predicate for listing updates and deletes.
    pub fn scope(&self) -> Result<MutationScope> {
        let user_id = self.require_user()?;
        Ok(if self.admin {
            MutationScope::Any
        } else {
            MutationScope::Owner(user_id)
        })
    }

    /// Like [`Session::scope`], but the owner of a listing always acts as
    /// owner, whatever the admin flag says.
    pub fn scope_for(&self, owner: Option<Uuid>) -> Result<MutationScope> {
        let user_id = self.require_user()?;
        if owner == Some(user_id) {
            return Ok(MutationScope::Owner(user_id));
        }
        self.scope()
    }

    /// Whether edit and delete are offered for `listing`.
    pub fn can_manage(&self, listing: &Listing) -> bool {
        match self.user_id {
            Some(user_id) => self.admin || listing.is_owned_by(user_id),
            None => false,
        }
    }

    pub async fn enter_admin<B: Backend>(&mut self, backend: &B, admin_key: &str) -> Result<()> {
        self.require_user()?;
        if admin_key.trim().is_empty() {
            return Err(ClientError::InvalidAdminKey);
        }

        if !backend.elevate(admin_key).await? {
            return Err(ClientError::InvalidAdminKey);
        }

        self.admin = true;
        if let Err(e) = self.store.save(true) {
            warn!("Admin mode enabled but not persisted: {}", e);
        }
        info!("Admin mode enabled");
        Ok(())
    }

    /// The local flag is dropped even if the backend call fails.
    pub async fn exit_admin<B: Backend>(&mut self, backend: &B) -> Result<()> {
        self.admin = false;
        if let Err(e) = self.store.save(false) {
            warn!("Failed to persist admin mode: {}", e);
        }

        if self.user_id.is_some() {
            backend
                .update_user_metadata(UserMetadata { is_admin: false })
                .await?;
        }
        info!("Admin mode disabled");
        Ok(())
    }

    pub async fn sign_out<B: Backend>(&mut self, backend: &B) -> Result<()> {
        backend.sign_out().await?;
        self.user_id = None;
        self.admin = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use treetrade_types::models::{ListingDraft, SellerProfile};

    fn listing_owned_by(owner: Uuid) -> Listing {
        let draft = ListingDraft::default();
        Listing {
            id: Uuid::new_v4(),
            user_id: owner,
            title: "Desk Lamp".into(),
            description: "Warm light".into(),
            price: "15".into(),
            category: "Electronics".into(),
            condition: draft.condition,
            images: vec![],
            location: draft.location,
            seller: SellerProfile::from_join(owner, None, None, None),
            created_at: Utc::now(),
            expires_at: Utc::now(),
        }
    }

    fn temp_state() -> PathBuf {
        std::env::temp_dir().join(format!("treetrade-state-{}.json", Uuid::new_v4()))
    }

    #[test]
    fn admin_flag_round_trips_through_file() {
        let path = temp_state();
        let store = AdminStore::file(&path);
        assert!(!store.load());

        store.save(true).unwrap();
        assert!(store.load());
        assert!(Session::new(Some(Uuid::new_v4()), store.clone()).is_admin());
        // Signed-out sessions never start in admin mode.
        assert!(!Session::new(None, store).is_admin());

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn corrupt_state_is_ignored() {
        let path = temp_state();
        std::fs::write(&path, "{not json").unwrap();
        assert!(!AdminStore::file(&path).load());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn scope_and_manage_follow_ownership() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let session = Session::new(Some(me), AdminStore::memory());

        assert_eq!(session.scope().unwrap(), MutationScope::Owner(me));
        assert!(session.can_manage(&listing_owned_by(me)));
        assert!(!session.can_manage(&listing_owned_by(other)));

        let signed_out = Session::new(None, AdminStore::memory());
        assert!(matches!(signed_out.scope(), Err(ClientError::NotSignedIn)));
        assert!(!signed_out.can_manage(&listing_owned_by(me)));
    }

    #[test]
    fn admin_scope_is_any() {
        let mut session = Session::new(Some(Uuid::new_v4()), AdminStore::memory());
        session.admin = true;
        assert_eq!(session.scope().unwrap(), MutationScope::Any);
        assert!(session.can_manage(&listing_owned_by(Uuid::new_v4())));
    }

    #[test]
    fn owners_act_as_owner_even_in_admin_mode() {
        let me = Uuid::new_v4();
        let mut session = Session::new(Some(me), AdminStore::memory());
        session.admin = true;

        assert_eq!(session.scope_for(Some(me)).unwrap(), MutationScope::Owner(me));
        assert_eq!(session.scope_for(Some(Uuid::new_v4())).unwrap(), MutationScope::Any);
        assert_eq!(session.scope_for(None).unwrap(), MutationScope::Any);

        session.admin = false;
        assert_eq!(session.scope_for(None).unwrap(), MutationScope::Owner(me));
    }
}
