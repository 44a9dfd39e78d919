use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Tables that emit change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Messages,
    Conversations,
}

/// Row-level change notifications published by the backend after a write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChangeEvent {
    /// A message row was inserted
    MessageInserted { message: Message },

    /// A conversation was created
    ConversationInserted {
        conversation_id: Uuid,
        listing_id: Uuid,
        buyer_id: Uuid,
        seller_id: Uuid,
    },

    /// A conversation row changed (its `updated_at` moves on every new message)
    ConversationUpdated {
        conversation_id: Uuid,
        buyer_id: Uuid,
        seller_id: Uuid,
    },

    /// A conversation was removed along with its listing
    ConversationDeleted { conversation_id: Uuid },
}

impl ChangeEvent {
    pub fn table(&self) -> Table {
        match self {
            Self::MessageInserted { .. } => Table::Messages,
            Self::ConversationInserted { .. }
            | Self::ConversationUpdated { .. }
            | Self::ConversationDeleted { .. } => Table::Conversations,
        }
    }

    /// Returns the conversation this event is scoped to.
    pub fn conversation_id(&self) -> Uuid {
        match self {
            Self::MessageInserted { message } => message.conversation_id,
            Self::ConversationInserted { conversation_id, .. }
            | Self::ConversationUpdated { conversation_id, .. }
            | Self::ConversationDeleted { conversation_id } => *conversation_id,
        }
    }
}
