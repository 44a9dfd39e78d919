//! Live update layer for the inbox.
//!
//! Idle, a change subscription on `messages` and `conversations` re-fetches
//! the conversation list. With a thread open, a fixed-period poll re-fetches
//! its messages as well, and pushed messages for it merge straight away.
//! Each fetch is tied to a [`CancellationToken`] for the view that asked for
//! it: the inbox as a whole, or the open thread.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use treetrade_realtime::Subscription;
use treetrade_types::events::{ChangeEvent, Table};
use treetrade_types::models::Message;

use crate::backend::Backend;
use crate::error::Result;
use crate::inbox::InboxState;
use crate::messaging::ConversationGateway;
use crate::session::Session;

/// A running inbox session. Dropping it stops all background work.
pub struct Inbox<B> {
    shared: Arc<Shared<B>>,
}

struct Shared<B> {
    gateway: ConversationGateway<B>,
    user_id: Uuid,
    state: watch::Sender<InboxState>,
    root: CancellationToken,
    thread: Mutex<Option<ThreadHandle>>,
    poll_interval: Duration,
}

struct ThreadHandle {
    conversation_id: Uuid,
    token: CancellationToken,
}

impl<B: Backend> Inbox<B> {
    /// Subscribe, load the conversation list and start listening. With a
    /// `deep_link` listing, its conversation opens as soon as it shows up.
    pub async fn open(
        backend: B,
        session: &Session,
        poll_interval: Duration,
        deep_link: Option<Uuid>,
    ) -> Result<Self> {
        let user_id = session.require_user()?;

        // Subscribe before the first fetch so nothing falls in between.
        let subscription = backend.subscribe(&[Table::Messages, Table::Conversations]);

        let (state, _) = watch::channel(InboxState::new(user_id, deep_link));
        let shared = Arc::new(Shared {
            gateway: ConversationGateway::new(backend),
            user_id,
            state,
            root: CancellationToken::new(),
            thread: Mutex::new(None),
            poll_interval,
        });

        info!("Inbox opened for {} (subscription {})", user_id, subscription.id());
        shared.refresh_conversations().await;
        tokio::spawn(shared.clone().listen(subscription));

        Ok(Self { shared })
    }

    pub fn user_id(&self) -> Uuid {
        self.shared.user_id
    }

    /// Receives a new snapshot on every state change.
    pub fn watch(&self) -> watch::Receiver<InboxState> {
        self.shared.state.subscribe()
    }

    pub fn snapshot(&self) -> InboxState {
        self.shared.state.borrow().clone()
    }

    pub async fn refresh_conversations(&self) {
        self.shared.refresh_conversations().await;
    }

    /// Open a thread: load its messages and start polling it.
    pub async fn select(&self, conversation_id: Uuid) {
        self.shared.select(conversation_id).await;
    }

    /// Back to the conversation list; polling for the thread stops.
    pub fn back(&self) {
        self.shared.back();
    }

    pub fn set_composer(&self, text: impl Into<String>) {
        let text = text.into();
        self.shared.state.send_modify(|state| state.composer = text);
    }

    /// Send the composer's text to the open thread.
    ///
    /// The composer is cleared before the call goes out. If it fails the
    /// original text is put back, as long as the same thread is still open,
    /// and the error returned; nothing is retried.
    /// `Ok(None)` means there was nothing to send.
    pub async fn send(&self) -> Result<Option<Message>> {
        self.shared.send().await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<Option<Message>> {
        self.set_composer(text);
        self.send().await
    }

    pub fn close(&self) {
        self.shared.root.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.root.is_cancelled()
    }
}

impl<B> Drop for Inbox<B> {
    fn drop(&mut self) {
        self.shared.root.cancel();
    }
}

impl<B: Backend> Shared<B> {
    fn thread_slot(&self) -> MutexGuard<'_, Option<ThreadHandle>> {
        self.thread.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn refresh_conversations(self: &Arc<Self>) {
        let result = tokio::select! {
            _ = self.root.cancelled() => return,
            result = self.gateway.list_conversations(self.user_id) => result,
        };
        if self.root.is_cancelled() {
            return;
        }

        match result {
            Ok(conversations) => {
                let mut target = None;
                self.state
                    .send_modify(|state| target = state.set_conversations(conversations));
                if let Some(conversation_id) = target {
                    debug!("Deep link resolved to conversation {}", conversation_id);
                    self.select(conversation_id).await;
                }
            }
            Err(e) => error!("Error fetching conversations: {}", e),
        }
    }

    async fn select(self: &Arc<Self>, conversation_id: Uuid) {
        if self.root.is_cancelled() {
            return;
        }

        let token = {
            let mut slot = self.thread_slot();
            if let Some(previous) = slot.take() {
                previous.token.cancel();
            }
            let token = self.root.child_token();
            *slot = Some(ThreadHandle {
                conversation_id,
                token: token.clone(),
            });
            token
        };

        self.state.send_modify(|state| state.open_thread(conversation_id));
        debug!("Opened conversation {}", conversation_id);

        self.load_messages(conversation_id, &token).await;
        tokio::spawn(self.clone().poll_messages(conversation_id, token));
    }

    fn back(&self) {
        if let Some(handle) = self.thread_slot().take() {
            debug!("Closed conversation {}", handle.conversation_id);
            handle.token.cancel();
        }
        self.state.send_modify(|state| state.close_thread());
    }

    async fn load_messages(&self, conversation_id: Uuid, token: &CancellationToken) {
        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = self.gateway.list_messages(conversation_id) => result,
        };
        if token.is_cancelled() {
            debug!("Discarding messages for closed conversation {}", conversation_id);
            return;
        }

        match result {
            Ok(messages) => {
                self.state
                    .send_if_modified(|state| state.apply_messages(conversation_id, messages));
            }
            Err(e) => error!("Error fetching messages for {}: {}", conversation_id, e),
        }
    }

    async fn poll_messages(self: Arc<Self>, conversation_id: Uuid, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick is immediate; the initial load already ran.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.load_messages(conversation_id, &token).await,
            }
        }
        debug!("Stopped polling conversation {}", conversation_id);
    }

    async fn listen(self: Arc<Self>, mut subscription: Subscription) {
        loop {
            let event = tokio::select! {
                _ = self.root.cancelled() => break,
                event = subscription.recv() => match event {
                    Some(event) => event,
                    None => {
                        warn!("Change stream closed for inbox of {}", self.user_id);
                        break;
                    }
                },
            };

            if !self.concerns_user(&event) {
                continue;
            }
            match &event {
                ChangeEvent::MessageInserted { message } => {
                    self.state
                        .send_if_modified(|state| state.apply_pushed(message.clone()));
                }
                ChangeEvent::ConversationDeleted { conversation_id } => {
                    let open = self.state.borrow().active_conversation() == Some(*conversation_id);
                    if open {
                        info!("Open conversation {} was deleted", conversation_id);
                        self.back();
                    }
                }
                _ => {}
            }
            self.refresh_conversations().await;
        }
        debug!("Inbox listener for {} stopped", self.user_id);
    }

    fn concerns_user(&self, event: &ChangeEvent) -> bool {
        match event {
            ChangeEvent::ConversationInserted { buyer_id, seller_id, .. }
            | ChangeEvent::ConversationUpdated { buyer_id, seller_id, .. } => {
                *buyer_id == self.user_id || *seller_id == self.user_id
            }
            ChangeEvent::MessageInserted { .. } | ChangeEvent::ConversationDeleted { .. } => {
                let conversation_id = event.conversation_id();
                let state = self.state.borrow();
                state.active_conversation() == Some(conversation_id)
                    || state.conversations.iter().any(|c| c.id == conversation_id)
            }
        }
    }

    async fn send(&self) -> Result<Option<Message>> {
        let mut outgoing = None;
        self.state.send_if_modified(|state| {
            outgoing = state.take_outgoing();
            outgoing.is_some()
        });
        let Some(outgoing) = outgoing else {
            return Ok(None);
        };

        match self
            .gateway
            .send_message(outgoing.conversation_id, self.user_id, &outgoing.content)
            .await
        {
            Ok(message) => {
                self.state
                    .send_if_modified(|state| state.apply_pushed(message.clone()));
                Ok(Some(message))
            }
            Err(e) => {
                error!("Error sending message: {}", e);
                self.state
                    .send_if_modified(|state| state.restore_composer(outgoing));
                Err(e)
            }
        }
    }
}
