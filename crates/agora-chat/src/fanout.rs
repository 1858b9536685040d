//! Best-effort notification fan-out for new messages.
//!
//! One `notifications` row per other chat member. Nothing here returns an
//! error: a failed notification is logged and never fails the send.

use anyhow::anyhow;
use tracing::{debug, warn};
use uuid::Uuid;

use agora_types::models::{Chat, Message, Notification, NotificationKind};

use crate::backend::Backend;

pub const ATTACHMENT_TEXT: &str = "sent an attachment";
const UNKNOWN_SENDER: &str = "Someone";

/// Render the notification text for one message.
///
/// Group: `"{group} | {sender}: {body}"`. Direct chat: just the body.
pub fn compose(chat: &Chat, sender_name: &str, message: &Message) -> String {
    let body = if message.content.trim().is_empty() {
        ATTACHMENT_TEXT
    } else {
        message.content.as_str()
    };

    if chat.is_group {
        format!(
            "{} | {}: {}",
            chat.group_name.as_deref().unwrap_or("Group"),
            sender_name,
            body
        )
    } else {
        body.to_string()
    }
}

/// Insert one notification for `recipient`. Returns whether it was stored.
pub async fn notify_recipient(
    backend: &Backend,
    chat: &Chat,
    sender_name: &str,
    message: &Message,
    recipient: Uuid,
) -> bool {
    let notification = Notification {
        id: Uuid::new_v4(),
        user_id: recipient,
        sender_id: message.user_id,
        kind: NotificationKind::Message,
        message: compose(chat, sender_name, message),
        chat_id: Some(chat.id),
        post_id: None,
        comment_id: None,
        is_read: false,
        created_at: agora_db::now(),
    };

    match backend
        .db_call(move |db| db.insert_notification(&notification))
        .await
    {
        Ok(()) => true,
        Err(e) => {
            warn!(
                "Failed to notify {} about message {}: {}",
                recipient, message.id, e
            );
            false
        }
    }
}

/// Notify every member of the message's chat except its author.
/// Returns how many notifications were stored.
pub async fn fan_out(backend: &Backend, message: &Message) -> usize {
    let chat_id = message.chat_id;
    let sender_id = message.user_id;

    let context = backend
        .db_call(move |db| {
            let chat = db
                .get_chat(chat_id)?
                .ok_or_else(|| anyhow!("chat {} not found", chat_id))?;
            let members = db.get_members(chat_id)?;
            let sender = db.get_profiles(&[sender_id])?.into_iter().next();
            Ok((chat, members, sender))
        })
        .await;

    let (chat, members, sender) = match context {
        Ok(context) => context,
        Err(e) => {
            warn!("Skipping notifications for message {}: {}", message.id, e);
            return 0;
        }
    };

    let sender_name = sender
        .as_ref()
        .map(|p| p.display_name().to_string())
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string());

    let mut delivered = 0;
    for member in members.iter().filter(|m| m.user_id != sender_id) {
        if notify_recipient(backend, &chat, &sender_name, message, member.user_id).await {
            delivered += 1;
        }
    }

    debug!(
        "Message {} fanned out to {}/{} recipients",
        message.id,
        delivered,
        members.len().saturating_sub(1)
    );
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(is_group: bool) -> Chat {
        Chat {
            id: Uuid::new_v4(),
            is_group,
            group_name: is_group.then(|| "Hikers".to_string()),
            group_description: None,
            group_avatar_url: None,
            created_by: Uuid::new_v4(),
            created_at: agora_db::now(),
        }
    }

    fn message(content: &str) -> Message {
        let now = agora_db::now();
        Message {
            id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            content: content.into(),
            file_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn direct_chat_text_is_the_content() {
        assert_eq!(compose(&chat(false), "Ada", &message("see you at 5")), "see you at 5");
    }

    #[test]
    fn group_text_names_group_and_sender() {
        assert_eq!(
            compose(&chat(true), "Ada", &message("trail is open")),
            "Hikers | Ada: trail is open"
        );
    }

    #[test]
    fn empty_content_reads_as_attachment() {
        assert_eq!(compose(&chat(false), "Ada", &message("  ")), ATTACHMENT_TEXT);
        assert_eq!(
            compose(&chat(true), "Ada", &message("")),
            format!("Hikers | Ada: {}", ATTACHMENT_TEXT)
        );
    }
}
