//! The viewer's chat list.

use std::collections::HashMap;

use tracing::{debug, warn};
use uuid::Uuid;

use agora_db::Database;
use agora_realtime::Subscription;
use agora_types::api::{ChatPartner, ChatSummary};
use agora_types::events::RowChange;
use agora_types::models::{Chat, ChatMember};

use crate::backend::Backend;
use crate::error::{ChatError, Result};
use crate::session::Session;

const UNKNOWN_USER: &str = "Unknown user";

/// Attach member counts and, for direct chats, the other participant.
fn summarize(db: &Database, chats: Vec<Chat>, viewer: Uuid) -> anyhow::Result<Vec<ChatSummary>> {
    let chat_ids: Vec<Uuid> = chats.iter().map(|c| c.id).collect();

    let mut members: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for member in db.members_of_chats(&chat_ids)? {
        members.entry(member.chat_id).or_default().push(member.user_id);
    }

    let partner_ids: Vec<Uuid> = chats
        .iter()
        .filter(|c| !c.is_group)
        .filter_map(|c| members.get(&c.id)?.iter().copied().find(|id| *id != viewer))
        .collect();
    let profiles: HashMap<Uuid, _> = db
        .get_profiles(&partner_ids)?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let summaries = chats
        .into_iter()
        .map(|chat| {
            let chat_members = members.get(&chat.id).map(Vec::as_slice).unwrap_or(&[]);
            let partner = if chat.is_group {
                None
            } else {
                chat_members
                    .iter()
                    .copied()
                    .find(|id| *id != viewer)
                    .map(|user_id| match profiles.get(&user_id) {
                        Some(profile) => ChatPartner {
                            user_id,
                            display_name: profile.display_name().to_string(),
                            avatar_url: profile.avatar_url.clone(),
                        },
                        None => ChatPartner {
                            user_id,
                            display_name: UNKNOWN_USER.to_string(),
                            avatar_url: None,
                        },
                    })
            };
            ChatSummary {
                member_count: chat_members.len(),
                chat,
                partner,
            }
        })
        .collect();
    Ok(summaries)
}

/// Every chat the acting user belongs to, newest first.
pub async fn list_chats(backend: &Backend, session: Session) -> Result<Vec<ChatSummary>> {
    let viewer = session.user_id;
    Ok(backend
        .db_call(move |db| {
            let chats = db.chats_for_user(viewer)?;
            summarize(db, chats, viewer)
        })
        .await?)
}

pub async fn chat_summary(backend: &Backend, session: Session, chat_id: Uuid) -> Result<ChatSummary> {
    let viewer = session.user_id;
    let summary = backend
        .db_call(move |db| {
            let Some(chat) = db.get_chat(chat_id)? else {
                return Ok(None);
            };
            if !db.is_member(chat_id, viewer)? {
                return Ok(None);
            }
            Ok(summarize(db, vec![chat], viewer)?.into_iter().next())
        })
        .await?;

    summary.ok_or_else(|| ChatError::NotFound(format!("chat {}", chat_id)))
}

/// Local copy of the chat list, kept current through the viewer's
/// membership events.
pub struct ChatDirectory {
    backend: Backend,
    session: Session,
    chats: Vec<ChatSummary>,
    last_error: Option<String>,
    subscription: Option<Subscription<ChatMember>>,
}

impl ChatDirectory {
    pub fn new(backend: Backend, session: Session) -> Self {
        Self {
            backend,
            session,
            chats: Vec::new(),
            last_error: None,
            subscription: None,
        }
    }

    /// Start following membership changes. Idempotent.
    pub fn subscribe(&mut self) {
        if self.subscription.is_none() {
            self.subscription = Some(self.backend.hub().subscribe_memberships(self.session.user_id));
        }
    }

    pub fn unsubscribe(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    /// Reload the list. On failure the previous list is kept and the
    /// error is remembered in [`last_error`](Self::last_error).
    pub async fn refresh(&mut self) -> Result<&[ChatSummary]> {
        match list_chats(&self.backend, self.session).await {
            Ok(chats) => {
                self.chats = chats;
                self.last_error = None;
                Ok(&self.chats)
            }
            Err(e) => {
                warn!("Failed to refresh chats for {}: {}", self.session.user_id, e);
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub fn chats(&self) -> &[ChatSummary] {
        &self.chats
    }

    pub fn get(&self, chat_id: Uuid) -> Option<&ChatSummary> {
        self.chats.iter().find(|c| c.id() == chat_id)
    }

    pub fn contains(&self, chat_id: Uuid) -> bool {
        self.get(chat_id).is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Fetch and add a chat we were not showing yet.
    pub async fn ensure(&mut self, chat_id: Uuid) -> Result<bool> {
        if self.contains(chat_id) {
            return Ok(false);
        }
        let summary = chat_summary(&self.backend, self.session, chat_id).await?;
        self.chats.push(summary);
        Ok(true)
    }

    pub fn remove_local(&mut self, chat_id: Uuid) -> bool {
        let before = self.chats.len();
        self.chats.retain(|c| c.id() != chat_id);
        self.chats.len() != before
    }

    /// Apply one membership change. Returns whether the list changed.
    pub async fn apply(&mut self, change: RowChange<ChatMember>) -> bool {
        if change.record().user_id != self.session.user_id {
            return false;
        }

        match change {
            RowChange::Insert(member) => match self.ensure(member.chat_id).await {
                Ok(added) => added,
                Err(e) => {
                    debug!("Could not load new chat {}: {}", member.chat_id, e);
                    false
                }
            },
            RowChange::Update(_) => false,
            RowChange::Delete(member) => self.remove_local(member.chat_id),
        }
    }

    /// Apply every membership change delivered so far.
    pub async fn sync(&mut self) -> usize {
        let changes = match self.subscription.as_mut() {
            Some(subscription) => subscription.drain(),
            None => return 0,
        };

        let mut changed = 0;
        for change in changes {
            if self.apply(change).await {
                changed += 1;
            }
        }
        changed
    }

    /// Wait for the next membership change and apply it.
    pub async fn next_change(&mut self) -> Option<bool> {
        let change = self.subscription.as_mut()?.recv().await?;
        Some(self.apply(change).await)
    }
}
