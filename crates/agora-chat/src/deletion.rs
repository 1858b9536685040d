//! Cascading chat deletion.
//!
//! A deletion runs as an explicit sequence of phases. Storage objects go
//! first and best-effort; dependent rows are then removed in foreign-key
//! order and the chat row last. A failure anywhere in that sequence is
//! retried once from the top. The `chat_deletions` marker hides the chat
//! from listings for the whole run and survives a failed run, so the
//! deletion can be resumed.

use tracing::{debug, info, warn};
use uuid::Uuid;

use agora_types::models::Chat;

use crate::backend::Backend;
use crate::error::{ChatError, Result};

const MAX_ATTEMPTS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionPhase {
    Requested,
    Authorizing,
    DeletingStorage,
    DeletingDependents,
    DeletingChatRow,
    Done,
    Rejected,
    Failed,
}

impl DeletionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Rejected | Self::Failed)
    }
}

/// Dependent rows removed, summed over every pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DependentRows {
    pub typing: usize,
    pub notifications: usize,
    pub messages: usize,
    pub members: usize,
}

impl DependentRows {
    fn add(&mut self, other: DependentRows) {
        self.typing += other.typing;
        self.notifications += other.notifications;
        self.messages += other.messages;
        self.members += other.members;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    pub chat_id: Uuid,
    /// Passes over the row sequence, 1 or 2.
    pub attempts: u8,
    pub removed_objects: usize,
    pub failed_objects: usize,
    pub rows: DependentRows,
}

pub struct ChatDeletion {
    chat_id: Uuid,
    requested_by: Uuid,
    phase: DeletionPhase,
    history: Vec<DeletionPhase>,
}

impl ChatDeletion {
    pub fn new(chat_id: Uuid, requested_by: Uuid) -> Self {
        Self {
            chat_id,
            requested_by,
            phase: DeletionPhase::Requested,
            history: vec![DeletionPhase::Requested],
        }
    }

    pub fn chat_id(&self) -> Uuid {
        self.chat_id
    }

    pub fn phase(&self) -> DeletionPhase {
        self.phase
    }

    /// Every phase entered so far, in order.
    pub fn history(&self) -> &[DeletionPhase] {
        &self.history
    }

    fn enter(&mut self, phase: DeletionPhase) {
        debug!("Chat {} deletion: {:?} -> {:?}", self.chat_id, self.phase, phase);
        self.phase = phase;
        self.history.push(phase);
    }

    pub async fn run(&mut self, backend: &Backend) -> Result<DeletionReport> {
        if self.phase != DeletionPhase::Requested {
            return Err(ChatError::Validation(format!(
                "deletion of chat {} already ran ({:?})",
                self.chat_id, self.phase
            )));
        }

        self.enter(DeletionPhase::Authorizing);
        let chat = match self.authorize(backend).await {
            Ok(Some(chat)) => chat,
            Ok(None) => {
                // Row already gone from an earlier run; only the marker is left.
                let chat_id = self.chat_id;
                backend.db_call(move |db| db.clear_deletion(chat_id)).await?;
                self.enter(DeletionPhase::Done);
                return Ok(DeletionReport {
                    chat_id,
                    attempts: 0,
                    removed_objects: 0,
                    failed_objects: 0,
                    rows: DependentRows::default(),
                });
            }
            Err(e @ (ChatError::Forbidden(_) | ChatError::NotFound(_))) => {
                self.enter(DeletionPhase::Rejected);
                return Err(e);
            }
            Err(e) => {
                warn!("Could not authorize deletion of chat {}: {}", self.chat_id, e);
                self.enter(DeletionPhase::Failed);
                return Err(e);
            }
        };

        let (chat_id, requested_by) = (self.chat_id, self.requested_by);
        if let Err(e) = backend
            .db_call(move |db| db.record_deletion(chat_id, requested_by))
            .await
        {
            self.enter(DeletionPhase::Failed);
            return Err(e.into());
        }

        self.enter(DeletionPhase::DeletingStorage);
        let (removed_objects, failed_objects) = self.delete_storage(backend, &chat).await;

        let mut attempts = 0;
        let mut rows = DependentRows::default();
        loop {
            attempts += 1;
            match self.delete_rows(backend, &mut rows).await {
                Ok(()) => break,
                Err(e) if attempts < MAX_ATTEMPTS => {
                    warn!(
                        "Deleting chat {} failed in {:?}, retrying: {}",
                        chat_id, self.phase, e
                    );
                }
                Err(e) => {
                    warn!(
                        "Deleting chat {} failed in {:?} after {} attempts: {}",
                        chat_id, self.phase, attempts, e
                    );
                    self.enter(DeletionPhase::Failed);
                    return Err(ChatError::IncompleteCleanup { chat_id, source: e });
                }
            }
        }

        if let Err(e) = backend.db_call(move |db| db.clear_deletion(chat_id)).await {
            warn!("Chat {} deleted but its deletion marker remains: {}", chat_id, e);
        }

        self.enter(DeletionPhase::Done);
        info!(
            "Deleted chat {} ({} messages, {} members, {} objects removed)",
            chat_id, rows.messages, rows.members, removed_objects
        );

        Ok(DeletionReport {
            chat_id,
            attempts,
            removed_objects,
            failed_objects,
            rows,
        })
    }

    /// `Ok(None)` when the chat row is gone but a marker from an earlier
    /// run by the same user is still pending.
    async fn authorize(&self, backend: &Backend) -> Result<Option<Chat>> {
        let (chat_id, user_id) = (self.chat_id, self.requested_by);

        let (chat, is_member, pending) = backend
            .db_call(move |db| {
                let chat = db.get_chat(chat_id)?;
                let is_member = db.is_member(chat_id, user_id)?;
                let pending = db.pending_deletions(user_id)?.contains(&chat_id);
                Ok((chat, is_member, pending))
            })
            .await?;

        let Some(chat) = chat else {
            if pending {
                return Ok(None);
            }
            return Err(ChatError::NotFound(format!("chat {}", chat_id)));
        };

        let allowed = if chat.is_group {
            chat.is_admin(user_id)
        } else {
            // Either participant may delete a direct chat. Members may already
            // be gone when resuming, so the original requester also counts.
            is_member || pending
        };

        if !allowed {
            return Err(ChatError::Forbidden(if chat.is_group {
                format!("only the group admin can delete chat {}", chat_id)
            } else {
                format!("not a participant of chat {}", chat_id)
            }));
        }
        Ok(Some(chat))
    }

    async fn delete_storage(&self, backend: &Backend, chat: &Chat) -> (usize, usize) {
        let chat_id = chat.id;
        let mut urls = match backend.db_call(move |db| db.message_file_urls(chat_id)).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!("Could not list attachments of chat {}: {}", chat_id, e);
                Vec::new()
            }
        };
        urls.extend(chat.group_avatar_url.clone());

        if urls.is_empty() {
            return (0, 0);
        }
        backend.remove_objects(&urls).await
    }

    /// One pass: dependents in foreign-key order, then the chat row.
    /// Counts accumulate into `total` so a retried pass reports everything.
    async fn delete_rows(&mut self, backend: &Backend, total: &mut DependentRows) -> anyhow::Result<()> {
        let chat_id = self.chat_id;

        self.enter(DeletionPhase::DeletingDependents);
        let rows = backend
            .db_call(move |db| {
                Ok(DependentRows {
                    typing: db.delete_typing_for_chat(chat_id)?,
                    notifications: db.delete_notifications_for_chat(chat_id)?,
                    messages: db.delete_messages_for_chat(chat_id)?,
                    members: db.delete_members_for_chat(chat_id)?,
                })
            })
            .await?;
        total.add(rows);

        self.enter(DeletionPhase::DeletingChatRow);
        let deleted = backend.db_call(move |db| db.delete_chat_row(chat_id)).await?;
        if !deleted {
            debug!("Chat row {} was already gone", chat_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases() {
        assert!(DeletionPhase::Done.is_terminal());
        assert!(DeletionPhase::Rejected.is_terminal());
        assert!(DeletionPhase::Failed.is_terminal());
        assert!(!DeletionPhase::DeletingDependents.is_terminal());
    }

    #[test]
    fn new_deletion_starts_requested() {
        let deletion = ChatDeletion::new(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(deletion.phase(), DeletionPhase::Requested);
        assert_eq!(deletion.history(), &[DeletionPhase::Requested]);
    }
}
