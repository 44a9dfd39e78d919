use std::sync::{Arc, RwLock};

use anyhow::{Context, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use treetrade_db::models::{ConversationRow, ListingFields, ListingRow, MessageRow, Scope};
use treetrade_db::{Database, parse_timestamp};
use treetrade_realtime::{Dispatcher, Subscription};
use treetrade_storage::Bucket;
use treetrade_types::api::{
    ConversationKey, MutationScope, NewListing, NewMessage, UploadProgress, UserMetadata,
};
use treetrade_types::events::{ChangeEvent, Table};
use treetrade_types::models::{
    Conversation, DEFAULT_AVATAR, LastMessage, Listing, ListingDraft, ListingSummary, Message,
    ParticipantProfile, Profile, SellerProfile,
};

use super::Backend;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

/// Bucket holding listing images.
pub const IMAGE_BUCKET: &str = "listings";

/// In-process backend: SQLite store, change dispatcher and image bucket.
///
/// Clones share the signed-in identity. [`LocalBackend::new_session`] gives a
/// second, independently authenticated handle onto the same data, which is how
/// a buyer and a seller share one backend.
#[derive(Clone)]
pub struct LocalBackend {
    shared: Arc<Shared>,
    session: Arc<RwLock<Option<Uuid>>>,
}

struct Shared {
    db: Database,
    dispatcher: Dispatcher,
    bucket: Bucket,
    /// Argon2 hash of the admin key; `None` disables elevation
    admin_key_hash: Option<String>,
}

impl LocalBackend {
    pub async fn open(config: &ClientConfig) -> Result<Self> {
        let db = match &config.db_path {
            Some(path) => Database::open(path)?,
            None => Database::open_in_memory()?,
        }
        .with_listing_ttl(config.listing_ttl);

        let bucket = Bucket::new(&config.bucket_dir, IMAGE_BUCKET, &config.public_url).await?;
        Self::new(db, bucket, config.admin_key.as_deref())
    }

    pub fn new(db: Database, bucket: Bucket, admin_key: Option<&str>) -> Result<Self> {
        let admin_key_hash = admin_key.map(hash_admin_key).transpose()?;
        if admin_key_hash.is_none() {
            info!("No admin key configured; admin elevation disabled");
        }

        Ok(Self {
            shared: Arc::new(Shared {
                db,
                dispatcher: Dispatcher::new(),
                bucket,
                admin_key_hash,
            }),
            session: Arc::new(RwLock::new(None)),
        })
    }

    /// A handle onto the same backend with its own, signed-out identity.
    pub fn new_session(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            session: Arc::new(RwLock::new(None)),
        }
    }

    /// Establish the identity for this handle, creating or refreshing the
    /// user's profile. The server-side admin role is left untouched.
    pub async fn sign_in(&self, profile: &Profile) -> Result<()> {
        let p = profile.clone();
        self.blocking(move |shared| {
            shared
                .db
                .upsert_profile(&p.id.to_string(), &p.name, &p.username, &p.avatar)?;
            Ok(())
        })
        .await?;

        self.set_session(Some(profile.id));
        info!("{} ({}) signed in", profile.username, profile.id);
        Ok(())
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    fn set_session(&self, user_id: Option<Uuid>) {
        match self.session.write() {
            Ok(mut session) => *session = user_id,
            Err(e) => error!("Session lock poisoned: {}", e),
        }
    }

    fn require_user(&self) -> Result<Uuid> {
        self.current_user().ok_or(ClientError::NotSignedIn)
    }

    /// Run blocking DB work off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Shared) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let shared = self.shared.clone();
        tokio::task::spawn_blocking(move || f(&shared))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ClientError::Backend(anyhow!("background task failed: {}", e))
            })?
    }
}

impl Backend for LocalBackend {
    fn current_user(&self) -> Option<Uuid> {
        self.session.read().ok().and_then(|session| *session)
    }

    async fn sign_out(&self) -> Result<()> {
        if let Some(user_id) = self.current_user() {
            info!("{} signed out", user_id);
        }
        self.set_session(None);
        Ok(())
    }

    async fn update_user_metadata(&self, metadata: UserMetadata) -> Result<()> {
        let user_id = self.require_user()?;
        if metadata.is_admin {
            return Err(ClientError::Forbidden(
                "the admin role is only granted with an admin key".into(),
            ));
        }

        self.blocking(move |shared| {
            shared.db.set_admin(&user_id.to_string(), false)?;
            Ok(())
        })
        .await?;

        info!("Admin role cleared for {}", user_id);
        Ok(())
    }

    async fn elevate(&self, admin_key: &str) -> Result<bool> {
        let user_id = self.require_user()?;
        let key = admin_key.to_string();

        let granted = self
            .blocking(move |shared| {
                let Some(hash) = shared.admin_key_hash.as_deref() else {
                    warn!("Admin elevation requested but no admin key is configured");
                    return Ok(false);
                };

                let parsed = PasswordHash::new(hash)
                    .map_err(|e| anyhow!("Stored admin key hash is invalid: {}", e))?;
                if Argon2::default().verify_password(key.as_bytes(), &parsed).is_err() {
                    return Ok(false);
                }

                if !shared.db.set_admin(&user_id.to_string(), true)? {
                    return Err(ClientError::NotFound(format!("profile {}", user_id)));
                }
                Ok(true)
            })
            .await?;

        if granted {
            info!("Admin role granted to {}", user_id);
        } else {
            warn!("Rejected admin key from {}", user_id);
        }
        Ok(granted)
    }

    async fn is_admin(&self) -> Result<bool> {
        let user_id = self.require_user()?;
        self.blocking(move |shared| {
            let is_admin = shared
                .db
                .get_profile(&user_id.to_string())?
                .is_some_and(|profile| profile.is_admin);
            Ok(is_admin)
        })
        .await
    }

    async fn fetch_listings(&self) -> Result<Vec<Listing>> {
        let rows = self.blocking(|shared| Ok(shared.db.list_listings()?)).await?;
        Ok(convert_rows(rows, listing_from_row, "listing"))
    }

    async fn insert_listing(&self, listing: NewListing) -> Result<Listing> {
        let user_id = self.require_user()?;
        if listing.user_id != user_id {
            return Err(ClientError::Forbidden("cannot post on behalf of another user".into()));
        }
        listing.draft.validate().map_err(ClientError::Validation)?;

        let id = Uuid::new_v4();
        let (images, location) = encode_draft(&listing.draft)?;
        let draft = listing.draft;

        let row = self
            .blocking(move |shared| {
                let fields = ListingFields {
                    title: draft.title.trim(),
                    description: &draft.description,
                    price: draft.price.trim(),
                    category: &draft.category,
                    condition: draft.condition.as_str(),
                    images: &images,
                    location: &location,
                };
                Ok(shared
                    .db
                    .insert_listing(&id.to_string(), &user_id.to_string(), &fields)?)
            })
            .await?;

        info!("Listing {} created by {}", id, user_id);
        Ok(listing_from_row(row)?)
    }

    async fn update_listing(&self, id: Uuid, draft: ListingDraft, scope: MutationScope) -> Result<u64> {
        let user_id = self.require_user()?;
        draft.validate().map_err(ClientError::Validation)?;
        let (images, location) = encode_draft(&draft)?;

        let rows = self
            .blocking(move |shared| {
                authorize_scope(&shared.db, user_id, scope)?;
                let owner = user_id.to_string();
                let fields = ListingFields {
                    title: draft.title.trim(),
                    description: &draft.description,
                    price: draft.price.trim(),
                    category: &draft.category,
                    condition: draft.condition.as_str(),
                    images: &images,
                    location: &location,
                };
                Ok(shared
                    .db
                    .update_listing(&id.to_string(), &fields, db_scope(scope, &owner))?)
            })
            .await?;

        debug!("Update of listing {} by {} touched {} rows", id, user_id, rows);
        Ok(rows as u64)
    }

    async fn delete_listing(&self, id: Uuid, scope: MutationScope) -> Result<u64> {
        let user_id = self.require_user()?;

        let deleted = self
            .blocking(move |shared| {
                authorize_scope(&shared.db, user_id, scope)?;
                let owner = user_id.to_string();
                Ok(shared.db.delete_listing(&id.to_string(), db_scope(scope, &owner))?)
            })
            .await?;

        for raw in &deleted.conversation_ids {
            match raw.parse::<Uuid>() {
                Ok(conversation_id) => {
                    self.shared
                        .dispatcher
                        .publish(ChangeEvent::ConversationDeleted { conversation_id });
                }
                Err(e) => warn!("Corrupt conversation id '{}': {}", raw, e),
            }
        }

        if deleted.rows > 0 {
            info!("Listing {} deleted by {}", id, user_id);
        }
        Ok(deleted.rows as u64)
    }

    async fn find_conversation(&self, key: ConversationKey) -> Result<Option<Uuid>> {
        self.require_user()?;
        let found = self
            .blocking(move |shared| {
                Ok(shared.db.find_conversation(
                    &key.listing_id.to_string(),
                    &key.buyer_id.to_string(),
                    &key.seller_id.to_string(),
                )?)
            })
            .await?;

        Ok(found
            .map(|raw| parse_uuid(&raw, "conversation id"))
            .transpose()?)
    }

    async fn insert_conversation(&self, key: ConversationKey) -> Result<Uuid> {
        let user_id = self.require_user()?;
        if key.buyer_id != user_id {
            return Err(ClientError::Forbidden(
                "conversations are opened by the buyer".into(),
            ));
        }
        if key.buyer_id == key.seller_id {
            return Err(ClientError::SelfMessage);
        }

        let new_id = Uuid::new_v4();
        let (raw_id, created) = self
            .blocking(move |shared| {
                let listing = shared
                    .db
                    .get_listing(&key.listing_id.to_string())?
                    .ok_or_else(|| ClientError::NotFound(format!("listing {}", key.listing_id)))?;
                if listing.user_id != key.seller_id.to_string() {
                    return Err(ClientError::Validation(
                        "seller does not own the listing".into(),
                    ));
                }

                Ok(shared.db.insert_conversation_if_absent(
                    &new_id.to_string(),
                    &key.listing_id.to_string(),
                    &key.buyer_id.to_string(),
                    &key.seller_id.to_string(),
                )?)
            })
            .await?;

        let conversation_id = parse_uuid(&raw_id, "conversation id")?;
        if created {
            info!("Conversation {} opened on listing {}", conversation_id, key.listing_id);
            self.shared.dispatcher.publish(ChangeEvent::ConversationInserted {
                conversation_id,
                listing_id: key.listing_id,
                buyer_id: key.buyer_id,
                seller_id: key.seller_id,
            });
        }
        Ok(conversation_id)
    }

    async fn fetch_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        if self.require_user()? != user_id {
            return Err(ClientError::Forbidden("cannot read another user's inbox".into()));
        }

        let rows = self
            .blocking(move |shared| Ok(shared.db.list_conversations_for_user(&user_id.to_string())?))
            .await?;
        Ok(convert_rows(rows, conversation_from_row, "conversation"))
    }

    async fn fetch_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let user_id = self.require_user()?;

        let rows = self
            .blocking(move |shared| {
                let conversation = shared
                    .db
                    .get_conversation(&conversation_id.to_string())?
                    .ok_or_else(|| ClientError::NotFound(format!("conversation {}", conversation_id)))?;
                let me = user_id.to_string();
                if conversation.buyer_id != me && conversation.seller_id != me {
                    return Err(ClientError::Forbidden("not a participant".into()));
                }
                Ok(shared.db.get_messages(&conversation_id.to_string())?)
            })
            .await?;
        Ok(convert_rows(rows, message_from_row, "message"))
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message> {
        let user_id = self.require_user()?;
        if message.sender_id != user_id {
            return Err(ClientError::Forbidden("cannot send as another user".into()));
        }
        if message.content.trim().is_empty() {
            return Err(ClientError::Validation("message is empty".into()));
        }

        let id = Uuid::new_v4();
        let (row, participants) = self
            .blocking(move |shared| {
                let row = shared.db.insert_message(
                    &id.to_string(),
                    &message.conversation_id.to_string(),
                    &message.sender_id.to_string(),
                    &message.content,
                )?;
                let participants = shared
                    .db
                    .get_conversation(&message.conversation_id.to_string())?
                    .map(|c| (c.buyer_id, c.seller_id));
                Ok((row, participants))
            })
            .await?;

        let stored = message_from_row(row)?;
        self.shared.dispatcher.publish(ChangeEvent::MessageInserted {
            message: stored.clone(),
        });
        if let Some((buyer, seller)) = participants {
            self.shared.dispatcher.publish(ChangeEvent::ConversationUpdated {
                conversation_id: stored.conversation_id,
                buyer_id: parse_uuid(&buyer, "buyer id")?,
                seller_id: parse_uuid(&seller, "seller id")?,
            });
        }

        debug!("Message {} stored in {}", stored.id, stored.conversation_id);
        Ok(stored)
    }

    fn subscribe(&self, tables: &[Table]) -> Subscription {
        self.shared.dispatcher.subscribe(tables)
    }

    async fn upload_image<F>(&self, path: String, bytes: Vec<u8>, progress: F) -> Result<String>
    where
        F: FnMut(UploadProgress) + Send + 'static,
    {
        self.require_user()?;
        let response = self.shared.bucket.upload(&path, &bytes, progress).await?;
        Ok(response.public_url)
    }
}

fn hash_admin_key(key: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(key.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash admin key: {}", e))?
        .to_string();
    Ok(hash)
}

/// `Any` is only honored for users whose stored profile carries the admin role.
fn authorize_scope(db: &Database, user_id: Uuid, scope: MutationScope) -> Result<()> {
    match scope {
        MutationScope::Owner(owner) if owner == user_id => Ok(()),
        MutationScope::Owner(_) => Err(ClientError::Forbidden(
            "cannot act on behalf of another user".into(),
        )),
        MutationScope::Any => {
            let is_admin = db
                .get_profile(&user_id.to_string())?
                .is_some_and(|profile| profile.is_admin);
            if is_admin {
                Ok(())
            } else {
                Err(ClientError::Forbidden("admin role required".into()))
            }
        }
    }
}

fn db_scope(scope: MutationScope, owner: &str) -> Scope<'_> {
    match scope {
        MutationScope::Owner(_) => Scope::Owner(owner),
        MutationScope::Any => Scope::Any,
    }
}

/// JSON text for the `images` and `location` columns.
fn encode_draft(draft: &ListingDraft) -> anyhow::Result<(String, String)> {
    Ok((
        serde_json::to_string(&draft.images)?,
        serde_json::to_string(&draft.location)?,
    ))
}

fn parse_uuid(raw: &str, what: &str) -> anyhow::Result<Uuid> {
    raw.parse()
        .with_context(|| format!("Corrupt {} '{}'", what, raw))
}

/// Convert rows, skipping (and logging) any that are corrupt.
fn convert_rows<R, T>(rows: Vec<R>, convert: fn(R) -> anyhow::Result<T>, what: &str) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match convert(row) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Skipping corrupt {} row: {:#}", what, e);
                None
            }
        })
        .collect()
}

fn listing_from_row(row: ListingRow) -> anyhow::Result<Listing> {
    let id = parse_uuid(&row.id, "listing id")?;
    let user_id = parse_uuid(&row.user_id, "listing owner")?;

    Ok(Listing {
        id,
        user_id,
        title: row.title,
        description: row.description,
        price: row.price,
        category: row.category,
        condition: row.condition.parse().map_err(|e: String| anyhow!(e))?,
        images: serde_json::from_str(&row.images).context("Corrupt listing images")?,
        location: serde_json::from_str(&row.location).context("Corrupt listing location")?,
        seller: SellerProfile::from_join(
            user_id,
            row.seller_name,
            row.seller_username,
            row.seller_avatar,
        ),
        created_at: parse_timestamp(&row.created_at)?,
        expires_at: parse_timestamp(&row.expires_at)?,
    })
}

fn participant(name: Option<String>, username: Option<String>, avatar: Option<String>) -> ParticipantProfile {
    ParticipantProfile {
        name: name.unwrap_or_else(|| "Unknown User".to_string()),
        username: username.unwrap_or_else(|| "unknown".to_string()),
        avatar: avatar.unwrap_or_else(|| DEFAULT_AVATAR.to_string()),
    }
}

fn conversation_from_row(row: ConversationRow) -> anyhow::Result<Conversation> {
    let images = match row.listing_images {
        Some(raw) => serde_json::from_str(&raw).context("Corrupt listing images")?,
        None => Vec::new(),
    };
    let last_message = match (row.last_message_content, row.last_message_at) {
        (Some(content), Some(at)) => Some(LastMessage {
            content,
            created_at: parse_timestamp(&at)?,
        }),
        _ => None,
    };

    Ok(Conversation {
        id: parse_uuid(&row.id, "conversation id")?,
        listing_id: parse_uuid(&row.listing_id, "listing id")?,
        buyer_id: parse_uuid(&row.buyer_id, "buyer id")?,
        seller_id: parse_uuid(&row.seller_id, "seller id")?,
        updated_at: parse_timestamp(&row.updated_at)?,
        listing: ListingSummary {
            title: row.listing_title.unwrap_or_default(),
            images,
        },
        buyer: participant(row.buyer_name, row.buyer_username, row.buyer_avatar),
        seller: participant(row.seller_name, row.seller_username, row.seller_avatar),
        last_message,
    })
}

fn message_from_row(row: MessageRow) -> anyhow::Result<Message> {
    Ok(Message {
        id: parse_uuid(&row.id, "message id")?,
        conversation_id: parse_uuid(&row.conversation_id, "conversation id")?,
        sender_id: parse_uuid(&row.sender_id, "sender id")?,
        content: row.content,
        created_at: parse_timestamp(&row.created_at)?,
        read: row.read,
    })
}
