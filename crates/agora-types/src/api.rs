use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Chat, Message};

// -- Directory --

/// The other participant of a 1:1 chat, as seen by the viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPartner {
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// A chat enriched for display in the viewer's chat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    #[serde(flatten)]
    pub chat: Chat,
    /// Set for 1:1 chats only; never the viewer themself.
    pub partner: Option<ChatPartner>,
    pub member_count: usize,
}

impl ChatSummary {
    pub fn id(&self) -> Uuid {
        self.chat.id
    }

    /// Name to show in a chat list row.
    pub fn title(&self) -> &str {
        if self.chat.is_group {
            self.chat.group_name.as_deref().unwrap_or("Group")
        } else {
            self.partner
                .as_ref()
                .map(|p| p.display_name.as_str())
                .unwrap_or("Unknown user")
        }
    }
}

// -- Requests --

/// File bytes inlined into a JSON body, base64-encoded.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachmentBody {
    pub file_name: String,
    pub data: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateDirectChatRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: String,
    pub description: Option<String>,
    pub avatar: Option<AttachmentBody>,
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CreateChatResponse {
    pub chat_id: Uuid,
    /// false when an existing 1:1 chat was reused
    pub created: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMembersRequest {
    pub user_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    pub attachment: Option<AttachmentBody>,
    pub editing_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub edited: bool,
    pub message: Message,
}

#[derive(Debug, Serialize)]
pub struct DeleteChatResponse {
    pub chat_id: Uuid,
    pub attempts: u8,
    pub removed_objects: usize,
    pub failed_objects: usize,
}
