//! Creating chats and managing who is in them.

use std::collections::HashSet;

use tracing::{info, warn};
use uuid::Uuid;

use agora_storage::paths;
use agora_types::models::{Chat, ChatMember};

use crate::backend::{Backend, FileUpload};
use crate::deletion::{ChatDeletion, DeletionReport};
use crate::error::{ChatError, Result};
use crate::session::Session;

#[derive(Debug, Clone, Default)]
pub struct GroupDraft {
    pub name: String,
    pub description: Option<String>,
    pub avatar: Option<FileUpload>,
}

impl GroupDraft {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCreated {
    pub chat: Chat,
    /// False when an existing direct chat was returned instead.
    pub created: bool,
}

/// Open the direct chat with `other`, creating it if the pair has none.
pub async fn create_one_to_one(backend: &Backend, session: Session, other: Uuid) -> Result<ChatCreated> {
    let me = session.user_id;
    if me == other {
        return Err(ChatError::Validation("cannot start a chat with yourself".into()));
    }

    if let Some(chat) = backend.db_call(move |db| db.find_direct_chat(me, other)).await? {
        return Ok(ChatCreated {
            chat,
            created: false,
        });
    }

    let chat = Chat {
        id: Uuid::new_v4(),
        is_group: false,
        group_name: None,
        group_description: None,
        group_avatar_url: None,
        created_by: me,
        created_at: agora_db::now(),
    };

    let row = chat.clone();
    backend
        .db_call(move |db| db.create_chat(&row, &[me, other]))
        .await?;

    info!("Created direct chat {} between {} and {}", chat.id, me, other);
    Ok(ChatCreated {
        chat,
        created: true,
    })
}

/// Create a group owned by the acting user. Either every row is written
/// or none is; an avatar uploaded for a failed create is removed again.
pub async fn create_group(
    backend: &Backend,
    session: Session,
    draft: GroupDraft,
    invited: &[Uuid],
) -> Result<ChatCreated> {
    let name = draft.name.trim().to_string();
    if name.is_empty() {
        return Err(ChatError::Validation("group name is required".into()));
    }

    let now = agora_db::now();
    let avatar_url = match &draft.avatar {
        Some(avatar) => {
            let key = paths::group_avatar(now, &avatar.file_name);
            Some(backend.upload(&key, avatar).await?)
        }
        None => None,
    };

    let chat = Chat {
        id: Uuid::new_v4(),
        is_group: true,
        group_name: Some(name),
        group_description: draft
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        group_avatar_url: avatar_url,
        created_by: session.user_id,
        created_at: now,
    };

    let mut seen = HashSet::new();
    let members: Vec<Uuid> = std::iter::once(session.user_id)
        .chain(invited.iter().copied())
        .filter(|id| seen.insert(*id))
        .collect();

    let row = chat.clone();
    if let Err(e) = backend
        .db_call(move |db| db.create_chat(&row, &members))
        .await
    {
        if let Some(url) = &chat.group_avatar_url {
            backend.remove_objects(std::slice::from_ref(url)).await;
        }
        return Err(e.into());
    }

    info!("Created group {} with {} invited", chat.id, seen.len() - 1);
    Ok(ChatCreated {
        chat,
        created: true,
    })
}

async fn load_group_as_admin(backend: &Backend, session: Session, chat_id: Uuid) -> Result<Chat> {
    let chat = backend
        .db_call(move |db| db.get_chat(chat_id))
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("chat {}", chat_id)))?;

    if !chat.is_group {
        return Err(ChatError::Validation(format!("chat {} is not a group", chat_id)));
    }
    if !chat.is_admin(session.user_id) {
        return Err(ChatError::Forbidden(format!(
            "only the group admin can manage members of {}",
            chat_id
        )));
    }
    Ok(chat)
}

/// Add users to a group. Returns only the memberships that are new.
pub async fn add_members(
    backend: &Backend,
    session: Session,
    chat_id: Uuid,
    user_ids: &[Uuid],
) -> Result<Vec<ChatMember>> {
    load_group_as_admin(backend, session, chat_id).await?;

    let user_ids = user_ids.to_vec();
    let added = backend
        .db_call(move |db| db.add_members(chat_id, &user_ids))
        .await?;

    info!("Added {} members to group {}", added.len(), chat_id);
    Ok(added)
}

pub async fn remove_member(
    backend: &Backend,
    session: Session,
    chat_id: Uuid,
    user_id: Uuid,
) -> Result<ChatMember> {
    let chat = load_group_as_admin(backend, session, chat_id).await?;
    if chat.is_admin(user_id) {
        return Err(ChatError::Validation(
            "the admin cannot be removed; delete the group instead".into(),
        ));
    }

    backend
        .db_call(move |db| db.remove_member(chat_id, user_id))
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("{} is not in chat {}", user_id, chat_id)))
}

/// Leave a group. The admin owns the group and has to delete it instead.
pub async fn leave_chat(backend: &Backend, session: Session, chat_id: Uuid) -> Result<()> {
    let user_id = session.user_id;
    let chat = backend
        .db_call(move |db| db.get_chat(chat_id))
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("chat {}", chat_id)))?;

    if !chat.is_group {
        return Err(ChatError::Validation("direct chats cannot be left".into()));
    }
    if chat.is_admin(user_id) {
        return Err(ChatError::Validation(
            "the admin cannot leave; delete the group instead".into(),
        ));
    }

    backend
        .db_call(move |db| db.remove_member(chat_id, user_id))
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("not a member of chat {}", chat_id)))?;
    Ok(())
}

pub async fn delete_chat(backend: &Backend, session: Session, chat_id: Uuid) -> Result<DeletionReport> {
    ChatDeletion::new(chat_id, session.user_id).run(backend).await
}

/// Re-run every deletion this user started that did not finish.
/// Returns the chats that are now fully gone.
pub async fn resume_pending_deletions(backend: &Backend, session: Session) -> Result<Vec<Uuid>> {
    let user_id = session.user_id;
    let pending = backend
        .db_call(move |db| db.pending_deletions(user_id))
        .await?;

    let mut finished = Vec::with_capacity(pending.len());
    for chat_id in pending {
        match delete_chat(backend, session, chat_id).await {
            Ok(_) => finished.push(chat_id),
            Err(e) => warn!("Pending deletion of chat {} still incomplete: {}", chat_id, e),
        }
    }
    Ok(finished)
}
