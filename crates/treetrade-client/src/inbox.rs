//! Inbox view model: which of the conversation list or an open thread is
//! shown, and the transcript of that thread. Pure state; the live layer in
//! [`crate::live`] drives it.

use uuid::Uuid;

use treetrade_types::models::{Conversation, Message};

use crate::transcript::Transcript;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxView {
    List,
    Thread(Uuid),
}

/// A message taken out of the composer, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub conversation_id: Uuid,
    /// Exactly what was in the composer, restored if the send fails
    pub raw: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct InboxState {
    pub user_id: Uuid,
    pub conversations: Vec<Conversation>,
    pub view: InboxView,
    pub transcript: Transcript,
    pub composer: String,
    /// Listing whose conversation opens automatically once
    pub deep_link: Option<Uuid>,
    deep_link_consumed: bool,
    /// Set after the first successful conversation-list load
    pub loaded: bool,
}

impl InboxState {
    pub fn new(user_id: Uuid, deep_link: Option<Uuid>) -> Self {
        Self {
            user_id,
            conversations: Vec::new(),
            view: InboxView::List,
            transcript: Transcript::new(),
            composer: String::new(),
            deep_link,
            deep_link_consumed: false,
            loaded: false,
        }
    }

    pub fn deep_link_pending(&self) -> bool {
        self.deep_link.is_some() && !self.deep_link_consumed
    }

    /// Replace the conversation list. Returns the conversation the deep link
    /// points at the first time it can be matched; never again afterwards.
    pub fn set_conversations(&mut self, conversations: Vec<Conversation>) -> Option<Uuid> {
        self.conversations = conversations;
        self.loaded = true;

        if !self.deep_link_pending() {
            return None;
        }
        let listing_id = self.deep_link?;
        let user_id = self.user_id;

        // As buyer first: that's the thread "message seller" created.
        let target = self
            .conversations
            .iter()
            .filter(|c| c.listing_id == listing_id && c.involves(user_id))
            .min_by_key(|c| c.buyer_id != user_id)?
            .id;

        self.deep_link_consumed = true;
        Some(target)
    }

    pub fn active_conversation(&self) -> Option<Uuid> {
        match self.view {
            InboxView::Thread(id) => Some(id),
            InboxView::List => None,
        }
    }

    pub fn selected(&self) -> Option<&Conversation> {
        let id = self.active_conversation()?;
        self.conversations.iter().find(|c| c.id == id)
    }

    /// Idle → Active. Any manual selection also retires the deep link.
    pub fn open_thread(&mut self, conversation_id: Uuid) {
        self.deep_link_consumed = true;
        if self.view != InboxView::Thread(conversation_id) {
            self.transcript.clear();
        }
        self.view = InboxView::Thread(conversation_id);
    }

    /// Active → Idle.
    pub fn close_thread(&mut self) {
        self.view = InboxView::List;
        self.transcript.clear();
    }

    /// Merge a fetched message list. Ignored unless `conversation_id` is
    /// still the open thread.
    pub fn apply_messages(&mut self, conversation_id: Uuid, messages: Vec<Message>) -> bool {
        if self.active_conversation() != Some(conversation_id) {
            return false;
        }
        self.transcript.merge_all(
            messages
                .into_iter()
                .filter(|m| m.conversation_id == conversation_id),
        )
    }

    /// Merge a single pushed message if it belongs to the open thread.
    pub fn apply_pushed(&mut self, message: Message) -> bool {
        if self.active_conversation() != Some(message.conversation_id) {
            return false;
        }
        self.transcript.merge(message)
    }

    /// Take the composer text for sending. A blank composer, or no open
    /// thread, leaves everything as it was.
    pub fn take_outgoing(&mut self) -> Option<Outgoing> {
        let conversation_id = self.active_conversation()?;
        let content = self.composer.trim().to_string();
        if content.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.composer);
        Some(Outgoing {
            conversation_id,
            raw,
            content,
        })
    }

    /// Put a failed message back in the composer, unless another thread has
    /// been opened since it was taken.
    pub fn restore_composer(&mut self, outgoing: Outgoing) -> bool {
        if self.active_conversation() != Some(outgoing.conversation_id) {
            return false;
        }
        self.composer = outgoing.raw;
        true
    }
}
