use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use treetrade_types::models::Message;

/// Messages of one conversation, unique by id and ordered by
/// `(created_at, id)`. Pushed and polled copies of a message collapse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    ordered: BTreeMap<(DateTime<Utc>, Uuid), Message>,
    ids: HashSet<Uuid>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the message was not already present.
    pub fn merge(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }
        self.ordered.insert((message.created_at, message.id), message);
        true
    }

    /// Returns `true` if any message was new.
    pub fn merge_all(&mut self, messages: impl IntoIterator<Item = Message>) -> bool {
        messages
            .into_iter()
            .fold(false, |changed, message| self.merge(message) || changed)
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.ordered.values()
    }

    pub fn last(&self) -> Option<&Message> {
        self.ordered.values().next_back()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ordered.clear();
        self.ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn message(conversation_id: Uuid, at: DateTime<Utc>, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: Uuid::new_v4(),
            content: content.into(),
            created_at: at,
            read: false,
        }
    }

    #[test]
    fn push_then_poll_keeps_one_copy() {
        let conversation = Uuid::new_v4();
        let now = Utc::now();
        let first = message(conversation, now, "Is this available?");
        let second = message(conversation, now + Duration::seconds(1), "Yes");

        let mut transcript = Transcript::new();
        assert!(transcript.merge(second.clone()));
        // The poll returns both, the pushed one again.
        assert!(transcript.merge_all(vec![first.clone(), second.clone()]));
        assert!(!transcript.merge_all(vec![first.clone(), second.clone()]));

        let contents: Vec<_> = transcript.messages().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["Is this available?", "Yes"]);
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.last().unwrap().id, second.id);
    }

    #[test]
    fn equal_timestamps_order_by_id() {
        let conversation = Uuid::new_v4();
        let now = Utc::now();
        let a = message(conversation, now, "a");
        let b = message(conversation, now, "b");

        let mut forward = Transcript::new();
        forward.merge_all(vec![a.clone(), b.clone()]);
        let mut backward = Transcript::new();
        backward.merge_all(vec![b, a]);

        assert_eq!(forward, backward);
    }
}
