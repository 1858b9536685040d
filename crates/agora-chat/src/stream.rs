//! Messages of one chat: load, send, edit, delete, and reconciliation of
//! the local list with realtime pushes.
//!
//! The local list can be changed from two sides: this client's own
//! successful writes (applied immediately) and realtime events, which may
//! be echoes of those same writes. Both go through [`MessageStream::apply`],
//! which merges idempotently by message id.

use tracing::{debug, info, warn};
use uuid::Uuid;

use agora_realtime::Subscription;
use agora_storage::paths;
use agora_types::events::RowChange;
use agora_types::models::Message;

use crate::backend::{Backend, FileUpload};
use crate::error::{ChatError, Result};
use crate::fanout;
use crate::session::Session;

/// What the user submitted from the composer.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub content: String,
    pub file: Option<FileUpload>,
    /// Set when the composer is editing an existing message.
    pub editing_id: Option<Uuid>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn edit(message_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            file: None,
            editing_id: Some(message_id),
        }
    }

    pub fn with_file(mut self, file: FileUpload) -> Self {
        self.file = Some(file);
        self
    }

    fn validate(&self) -> Result<()> {
        let blank = self.content.trim().is_empty();
        if self.editing_id.is_some() {
            if self.file.is_some() {
                return Err(ChatError::Validation(
                    "attachments cannot be changed by an edit".into(),
                ));
            }
            if blank {
                return Err(ChatError::Validation("edited message cannot be empty".into()));
            }
        } else if blank && self.file.is_none() {
            return Err(ChatError::Validation("message needs text or a file".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// A new row; `notified` is how many recipients got a notification.
    Sent { message: Message, notified: usize },
    Edited(Message),
}

impl SendOutcome {
    pub fn message(&self) -> &Message {
        match self {
            Self::Sent { message, .. } | Self::Edited(message) => message,
        }
    }
}

/// Load the newest messages of a chat, oldest first. Members only.
pub async fn load_messages(backend: &Backend, session: Session, chat_id: Uuid) -> Result<Vec<Message>> {
    let user_id = session.user_id;
    let limit = backend.config().message_limit;

    let messages = backend
        .db_call(move |db| {
            if !db.is_member(chat_id, user_id)? {
                return Ok(None);
            }
            db.get_messages(chat_id, limit).map(Some)
        })
        .await?;

    messages.ok_or_else(|| ChatError::Forbidden(format!("not a member of chat {}", chat_id)))
}

/// Send a new message or, when `editing_id` is set, edit one.
pub async fn send_message(
    backend: &Backend,
    session: Session,
    chat_id: Uuid,
    draft: MessageDraft,
) -> Result<SendOutcome> {
    draft.validate()?;

    if let Some(message_id) = draft.editing_id {
        return edit_message(backend, session, chat_id, message_id, draft.content).await;
    }

    let user_id = session.user_id;
    if !backend.db_call(move |db| db.is_member(chat_id, user_id)).await? {
        return Err(ChatError::Forbidden(format!("not a member of chat {}", chat_id)));
    }

    let now = agora_db::now();
    let file_url = match &draft.file {
        Some(file) => {
            let key = paths::message_attachment(user_id, now, &file.file_name);
            Some(backend.upload(&key, file).await?)
        }
        None => None,
    };

    let message = Message {
        id: Uuid::new_v4(),
        chat_id,
        user_id,
        content: draft.content.trim().to_string(),
        file_url,
        created_at: now,
        updated_at: now,
    };

    let row = message.clone();
    if let Err(e) = backend.db_call(move |db| db.insert_message(&row)).await {
        if let Some(url) = &message.file_url {
            backend.remove_objects(std::slice::from_ref(url)).await;
        }
        return Err(e.into());
    }

    let notified = fanout::fan_out(backend, &message).await;
    debug!("Message {} sent to chat {}", message.id, chat_id);
    Ok(SendOutcome::Sent { message, notified })
}

async fn edit_message(
    backend: &Backend,
    session: Session,
    chat_id: Uuid,
    message_id: Uuid,
    content: String,
) -> Result<SendOutcome> {
    let user_id = session.user_id;
    let content = content.trim().to_string();

    let (updated, exists) = backend
        .db_call(move |db| {
            let updated = db.update_message_content(chat_id, message_id, user_id, &content, agora_db::now())?;
            let exists = updated.is_some()
                || db.get_message(message_id)?.is_some_and(|m| m.chat_id == chat_id);
            Ok((updated, exists))
        })
        .await?;

    match updated {
        Some(message) => Ok(SendOutcome::Edited(message)),
        None if exists => Err(ChatError::Forbidden(format!(
            "message {} was written by someone else",
            message_id
        ))),
        None => Err(ChatError::NotFound(format!("message {} in chat {}", message_id, chat_id))),
    }
}

/// Delete one of the acting user's messages and, best-effort, its attachment.
pub async fn delete_message(backend: &Backend, session: Session, message_id: Uuid) -> Result<Message> {
    let user_id = session.user_id;

    let (deleted, exists) = backend
        .db_call(move |db| {
            let deleted = db.delete_message(message_id, user_id)?;
            let exists = deleted.is_some() || db.get_message(message_id)?.is_some();
            Ok((deleted, exists))
        })
        .await?;

    let message = match deleted {
        Some(message) => message,
        None if exists => {
            return Err(ChatError::Forbidden(format!(
                "message {} was written by someone else",
                message_id
            )));
        }
        None => return Err(ChatError::NotFound(format!("message {}", message_id))),
    };

    if let Some(url) = &message.file_url {
        let (_, failed) = backend.remove_objects(std::slice::from_ref(url)).await;
        if failed > 0 {
            warn!("Attachment of deleted message {} was left behind", message_id);
        }
    }

    Ok(message)
}

/// Local, ordered view of one chat's messages kept in sync with realtime.
pub struct MessageStream {
    backend: Backend,
    session: Session,
    chat_id: Uuid,
    messages: Vec<Message>,
    subscription: Option<Subscription<Message>>,
}

impl MessageStream {
    pub async fn open(backend: Backend, session: Session, chat_id: Uuid) -> Result<Self> {
        // Subscribe before loading; dedup absorbs any overlap.
        let subscription = backend.hub().subscribe_messages(chat_id);
        let messages = load_messages(&backend, session, chat_id).await?;

        let mut stream = Self {
            backend,
            session,
            chat_id,
            messages,
            subscription: Some(subscription),
        };
        stream.sync();

        info!(
            "Opened chat {} with {} messages",
            chat_id,
            stream.messages.len()
        );
        Ok(stream)
    }

    pub fn chat_id(&self) -> Uuid {
        self.chat_id
    }

    /// Messages ordered by `created_at`, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, message_id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Reload from the store. On failure the current list is kept.
    pub async fn reload(&mut self) -> Result<&[Message]> {
        let messages = load_messages(&self.backend, self.session, self.chat_id).await?;
        self.messages = messages;
        Ok(&self.messages)
    }

    pub async fn send(&mut self, draft: MessageDraft) -> Result<SendOutcome> {
        if let Some(message_id) = draft.editing_id {
            self.check_author(message_id)?;
        }

        let outcome = send_message(&self.backend, self.session, self.chat_id, draft).await?;
        match &outcome {
            SendOutcome::Sent { message, .. } => self.apply(RowChange::Insert(message.clone())),
            SendOutcome::Edited(message) => self.apply(RowChange::Update(message.clone())),
        };
        Ok(outcome)
    }

    pub async fn delete(&mut self, message_id: Uuid) -> Result<()> {
        self.check_author(message_id)?;
        let deleted = delete_message(&self.backend, self.session, message_id).await?;
        self.apply(RowChange::Delete(deleted));
        Ok(())
    }

    /// Reject edits/deletes of messages we can already see are someone else's.
    fn check_author(&self, message_id: Uuid) -> Result<()> {
        match self.get(message_id) {
            Some(message) if message.user_id != self.session.user_id => Err(ChatError::Forbidden(
                format!("message {} was written by someone else", message_id),
            )),
            _ => Ok(()),
        }
    }

    /// Merge one change into the local list. Returns whether anything changed.
    pub fn apply(&mut self, change: RowChange<Message>) -> bool {
        if change.record().chat_id != self.chat_id {
            return false;
        }

        match change {
            RowChange::Insert(message) => {
                if self.messages.iter().any(|m| m.id == message.id) {
                    return false;
                }
                let at = self
                    .messages
                    .partition_point(|m| m.created_at <= message.created_at);
                self.messages.insert(at, message);
                true
            }
            RowChange::Update(message) => {
                let Some(local) = self.messages.iter_mut().find(|m| m.id == message.id) else {
                    return false;
                };
                if local.content == message.content && local.updated_at == message.updated_at {
                    return false;
                }
                local.content = message.content;
                local.updated_at = message.updated_at;
                true
            }
            RowChange::Delete(message) => {
                let before = self.messages.len();
                self.messages.retain(|m| m.id != message.id);
                self.messages.len() != before
            }
        }
    }

    /// Apply every realtime change delivered so far. Returns how many
    /// changed the local list.
    pub fn sync(&mut self) -> usize {
        let changes = match self.subscription.as_mut() {
            Some(subscription) => subscription.drain(),
            None => return 0,
        };
        changes
            .into_iter()
            .map(|change| self.apply(change))
            .filter(|changed| *changed)
            .count()
    }

    /// Wait for the next realtime change and apply it.
    /// `None` once the stream is closed.
    pub async fn next_change(&mut self) -> Option<bool> {
        let change = self.subscription.as_mut()?.recv().await?;
        Some(self.apply(change))
    }

    /// Tear down the realtime subscription. The loaded list stays readable.
    pub fn close(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            debug!("Closed message stream for chat {}", self.chat_id);
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
