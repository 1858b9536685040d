use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use agora_types::events::{RowChange, Topic};
use agora_types::models::{ChatMember, Message, TypingSignal};

use crate::subscription::Subscription;

/// Per-topic buffer. A subscriber that falls further behind than this
/// skips the oldest events (and logs it).
const TOPIC_CAPACITY: usize = 256;

/// Routes row changes to the subscribers of each topic.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    /// `messages` changes, keyed by chat_id
    messages: Arc<Registry<Message>>,

    /// `typing_status` changes, keyed by chat_id
    typing: Arc<Registry<TypingSignal>>,

    /// `chat_members` changes, keyed by user_id
    memberships: Arc<Registry<ChatMember>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                messages: Arc::new(Registry::new(Topic::Messages)),
                typing: Arc::new(Registry::new(Topic::Typing)),
                memberships: Arc::new(Registry::new(Topic::Memberships)),
            }),
        }
    }

    pub fn subscribe_messages(&self, chat_id: Uuid) -> Subscription<Message> {
        Registry::subscribe(&self.inner.messages, chat_id)
    }

    pub fn subscribe_typing(&self, chat_id: Uuid) -> Subscription<TypingSignal> {
        Registry::subscribe(&self.inner.typing, chat_id)
    }

    pub fn subscribe_memberships(&self, user_id: Uuid) -> Subscription<ChatMember> {
        Registry::subscribe(&self.inner.memberships, user_id)
    }

    /// Publish a message change. Returns how many subscribers received it.
    pub fn publish_message(&self, change: RowChange<Message>) -> usize {
        let chat_id = change.record().chat_id;
        self.inner.messages.publish(chat_id, change)
    }

    pub fn publish_typing(&self, change: RowChange<TypingSignal>) -> usize {
        let chat_id = change.record().chat_id;
        self.inner.typing.publish(chat_id, change)
    }

    /// Membership changes go to the member's own topic.
    pub fn publish_membership(&self, change: RowChange<ChatMember>) -> usize {
        let user_id = change.record().user_id;
        self.inner.memberships.publish(user_id, change)
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        match topic {
            Topic::Messages(id) => self.inner.messages.subscriber_count(id),
            Topic::Typing(id) => self.inner.typing.subscriber_count(id),
            Topic::Memberships(id) => self.inner.memberships.subscriber_count(id),
        }
    }

    /// All topics that currently have at least one subscriber.
    pub fn active_topics(&self) -> Vec<Topic> {
        let mut topics = self.inner.messages.topics();
        topics.extend(self.inner.typing.topics());
        topics.extend(self.inner.memberships.topics());
        topics
    }
}

/// Broadcast senders for one row type, keyed by the topic's filter id.
pub(crate) struct Registry<T> {
    make_topic: fn(Uuid) -> Topic,
    senders: RwLock<HashMap<Uuid, broadcast::Sender<RowChange<T>>>>,
}

impl<T: Clone + Send + 'static> Registry<T> {
    fn new(make_topic: fn(Uuid) -> Topic) -> Self {
        Self {
            make_topic,
            senders: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn topic(&self, key: Uuid) -> Topic {
        (self.make_topic)(key)
    }

    fn subscribe(this: &Arc<Self>, key: Uuid) -> Subscription<T> {
        let mut senders = this.senders.write().unwrap_or_else(|e| e.into_inner());
        let rx = senders
            .entry(key)
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();

        debug!("Subscribed to {:?}", this.topic(key));
        Subscription::new(this.clone(), key, rx)
    }

    fn publish(&self, key: Uuid, change: RowChange<T>) -> usize {
        let senders = self.senders.read().unwrap_or_else(|e| e.into_inner());
        match senders.get(&key) {
            Some(tx) => {
                let delivered = tx.send(change).unwrap_or(0);
                trace!("Published to {:?} ({} subscribers)", self.topic(key), delivered);
                delivered
            }
            None => 0,
        }
    }

    /// Drop the topic's sender once its last receiver is gone.
    pub(crate) fn prune(&self, key: Uuid) {
        let mut senders = self.senders.write().unwrap_or_else(|e| e.into_inner());
        if senders.get(&key).is_some_and(|tx| tx.receiver_count() == 0) {
            senders.remove(&key);
            debug!("Pruned idle topic {:?}", self.topic(key));
        }
    }

    fn subscriber_count(&self, key: Uuid) -> usize {
        self.senders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .map_or(0, |tx| tx.receiver_count())
    }

    fn topics(&self) -> Vec<Topic> {
        self.senders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, tx)| tx.receiver_count() > 0)
            .map(|(key, _)| self.topic(*key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(chat_id: Uuid) -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4(),
            chat_id,
            user_id: Uuid::new_v4(),
            content: "hi".into(),
            file_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn events_only_reach_their_own_topic() {
        let hub = Hub::new();
        let chat_a = Uuid::new_v4();
        let chat_b = Uuid::new_v4();

        let mut sub_a = hub.subscribe_messages(chat_a);
        let mut sub_b = hub.subscribe_messages(chat_b);

        let msg = message(chat_a);
        assert_eq!(hub.publish_message(RowChange::Insert(msg.clone())), 1);

        assert_eq!(sub_a.try_recv(), Some(RowChange::Insert(msg)));
        assert_eq!(sub_b.try_recv(), None);
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let hub = Hub::new();
        assert_eq!(hub.publish_message(RowChange::Insert(message(Uuid::new_v4()))), 0);
        assert!(hub.active_topics().is_empty());
    }

    #[test]
    fn unsubscribe_prunes_the_topic() {
        let hub = Hub::new();
        let chat_id = Uuid::new_v4();

        let first = hub.subscribe_typing(chat_id);
        let second = hub.subscribe_typing(chat_id);
        assert_eq!(hub.subscriber_count(Topic::Typing(chat_id)), 2);

        first.unsubscribe();
        assert_eq!(hub.subscriber_count(Topic::Typing(chat_id)), 1);
        assert_eq!(hub.active_topics(), vec![Topic::Typing(chat_id)]);

        drop(second);
        assert_eq!(hub.subscriber_count(Topic::Typing(chat_id)), 0);
        assert!(hub.active_topics().is_empty());
    }

    #[test]
    fn membership_changes_route_by_user() {
        let hub = Hub::new();
        let user_id = Uuid::new_v4();
        let mut sub = hub.subscribe_memberships(user_id);

        let member = ChatMember {
            chat_id: Uuid::new_v4(),
            user_id,
            joined_at: Utc::now(),
        };
        hub.publish_membership(RowChange::Insert(member.clone()));
        hub.publish_membership(RowChange::Insert(ChatMember {
            user_id: Uuid::new_v4(),
            ..member.clone()
        }));

        assert_eq!(sub.try_recv(), Some(RowChange::Insert(member)));
        assert_eq!(sub.try_recv(), None);
    }
}
