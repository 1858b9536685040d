use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMember, Message, TypingSignal};

/// A single row-level change pushed by the realtime service.
/// `Delete` carries the row as it was before removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "record", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowChange<T> {
    Insert(T),
    Update(T),
    Delete(T),
}

impl<T> RowChange<T> {
    pub fn record(&self) -> &T {
        match self {
            Self::Insert(row) | Self::Update(row) | Self::Delete(row) => row,
        }
    }

    pub fn into_record(self) -> T {
        match self {
            Self::Insert(row) | Self::Update(row) | Self::Delete(row) => row,
        }
    }
}

/// A realtime subscription key. Every topic is scoped by an equality
/// filter on one foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Topic {
    /// `messages` rows where `chat_id = id`
    Messages(Uuid),
    /// `typing_status` rows where `chat_id = id`
    Typing(Uuid),
    /// `chat_members` rows where `user_id = id`
    Memberships(Uuid),
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the authenticated user
    Ready { user_id: Uuid },

    Subscribed { topic: Topic },

    Unsubscribed { topic: Topic },

    /// A change on a `Topic::Messages` subscription
    MessageChange { chat_id: Uuid, change: RowChange<Message> },

    /// A change on a `Topic::Typing` subscription
    TypingChange { chat_id: Uuid, change: RowChange<TypingSignal> },

    /// A change on a `Topic::Memberships` subscription
    MembershipChange { change: RowChange<ChatMember> },

    /// A command was refused (unknown topic, not a member, ...)
    Error { message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    Subscribe { topic: Topic },
    Unsubscribe { topic: Topic },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_command_wire_format() {
        let chat_id = Uuid::nil();
        let cmd: GatewayCommand = serde_json::from_str(&format!(
            r#"{{"type":"Subscribe","data":{{"topic":{{"kind":"typing","id":"{}"}}}}}}"#,
            chat_id
        ))
        .unwrap();

        match cmd {
            GatewayCommand::Subscribe { topic } => assert_eq!(topic, Topic::Typing(chat_id)),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn row_change_exposes_record() {
        let change = RowChange::Delete(7u32);
        assert_eq!(*change.record(), 7);
        assert_eq!(change.into_record(), 7);
    }
}
