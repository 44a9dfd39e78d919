use tracing::{debug, info};
use uuid::Uuid;

use treetrade_types::api::{ConversationKey, NewMessage};
use treetrade_types::models::{Conversation, Listing, Message};

use crate::backend::Backend;
use crate::error::{ClientError, Result};
use crate::session::Session;

/// Conversation and message calls against the backend.
#[derive(Clone)]
pub struct ConversationGateway<B> {
    backend: B,
}

impl<B: Backend> ConversationGateway<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Conversations where `user_id` is buyer or seller, most recently
    /// active first.
    pub async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        let conversations = self.backend.fetch_conversations(user_id).await?;
        debug!("Fetched {} conversations for {}", conversations.len(), user_id);
        Ok(conversations)
    }

    /// The one conversation between the signed-in buyer and the listing's
    /// seller, created on first use.
    pub async fn resolve_or_create_conversation(
        &self,
        session: &Session,
        listing: &Listing,
    ) -> Result<Uuid> {
        let buyer_id = session.require_user()?;
        if buyer_id == listing.user_id {
            return Err(ClientError::SelfMessage);
        }

        let key = ConversationKey {
            listing_id: listing.id,
            buyer_id,
            seller_id: listing.user_id,
        };

        if let Some(existing) = self.backend.find_conversation(key).await? {
            debug!("Reusing conversation {} for listing {}", existing, listing.id);
            return Ok(existing);
        }

        // Insert-if-absent: a racing call ends up with the same id.
        let id = self.backend.insert_conversation(key).await?;
        info!("Conversation {} ready for listing {}", id, listing.id);
        Ok(id)
    }

    /// Oldest first.
    pub async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        self.backend.fetch_messages(conversation_id).await
    }

    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<Message> {
        self.backend
            .insert_message(NewMessage {
                conversation_id,
                sender_id,
                content: content.to_string(),
            })
            .await
    }
}
