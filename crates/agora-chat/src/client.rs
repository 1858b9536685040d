use tracing::{debug, info};
use uuid::Uuid;

use agora_types::api::ChatSummary;
use agora_types::models::{ChatMember, TypingSignal};

use crate::backend::Backend;
use crate::deletion::DeletionReport;
use crate::directory::ChatDirectory;
use crate::error::{ChatError, Result};
use crate::lifecycle::{self, ChatCreated, GroupDraft};
use crate::presence::{self, TypingObserver};
use crate::session::Session;
use crate::stream::{MessageDraft, MessageStream, SendOutcome};

/// The chat currently open in the UI and its realtime feeds.
pub struct SelectedChat {
    pub stream: MessageStream,
    pub typing: TypingObserver,
}

/// One signed-in user's view of the chat subsystem: the chat list plus at
/// most one open chat. Switching chats tears down the previous chat's
/// subscriptions before opening new ones.
pub struct ChatClient {
    backend: Backend,
    session: Session,
    directory: ChatDirectory,
    selected: Option<SelectedChat>,
}

impl ChatClient {
    pub async fn connect(backend: Backend, session: Session) -> Result<Self> {
        let mut directory = ChatDirectory::new(backend.clone(), session);
        directory.subscribe();
        directory.refresh().await?;

        info!(
            "Chat client for {} ready with {} chats",
            session.user_id,
            directory.chats().len()
        );
        Ok(Self {
            backend,
            session,
            directory,
            selected: None,
        })
    }

    pub fn session(&self) -> Session {
        self.session
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn chats(&self) -> &[ChatSummary] {
        self.directory.chats()
    }

    pub fn directory(&self) -> &ChatDirectory {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut ChatDirectory {
        &mut self.directory
    }

    pub fn selected(&self) -> Option<&SelectedChat> {
        self.selected.as_ref()
    }

    pub fn selected_chat_id(&self) -> Option<Uuid> {
        self.selected.as_ref().map(|s| s.stream.chat_id())
    }

    pub async fn select_chat(&mut self, chat_id: Uuid) -> Result<&SelectedChat> {
        self.close_chat();

        let stream = MessageStream::open(self.backend.clone(), self.session, chat_id).await?;
        let typing = TypingObserver::subscribe(&self.backend, self.session, chat_id);

        Ok(self.selected.insert(SelectedChat { stream, typing }))
    }

    pub fn close_chat(&mut self) {
        if let Some(mut selected) = self.selected.take() {
            debug!("Closing chat {}", selected.stream.chat_id());
            selected.stream.close();
            selected.typing.unsubscribe();
        }
    }

    fn selected_mut(&mut self) -> Result<&mut SelectedChat> {
        self.selected
            .as_mut()
            .ok_or_else(|| ChatError::Validation("no chat is open".into()))
    }

    pub async fn send(&mut self, draft: MessageDraft) -> Result<SendOutcome> {
        self.selected_mut()?.stream.send(draft).await
    }

    pub async fn delete_message(&mut self, message_id: Uuid) -> Result<()> {
        self.selected_mut()?.stream.delete(message_id).await
    }

    pub async fn notify_typing(&mut self) -> Result<TypingSignal> {
        let chat_id = self.selected_mut()?.stream.chat_id();
        presence::notify_typing(&self.backend, self.session, chat_id).await
    }

    pub async fn start_direct_chat(&mut self, other: Uuid) -> Result<ChatCreated> {
        let created = lifecycle::create_one_to_one(&self.backend, self.session, other).await?;
        self.directory.ensure(created.chat.id).await?;
        Ok(created)
    }

    pub async fn create_group(&mut self, draft: GroupDraft, invited: &[Uuid]) -> Result<ChatCreated> {
        let created = lifecycle::create_group(&self.backend, self.session, draft, invited).await?;
        self.directory.ensure(created.chat.id).await?;
        Ok(created)
    }

    pub async fn add_members(&mut self, chat_id: Uuid, user_ids: &[Uuid]) -> Result<Vec<ChatMember>> {
        lifecycle::add_members(&self.backend, self.session, chat_id, user_ids).await
    }

    pub async fn leave_chat(&mut self, chat_id: Uuid) -> Result<()> {
        lifecycle::leave_chat(&self.backend, self.session, chat_id).await?;
        self.forget(chat_id);
        Ok(())
    }

    pub async fn delete_chat(&mut self, chat_id: Uuid) -> Result<DeletionReport> {
        let report = lifecycle::delete_chat(&self.backend, self.session, chat_id).await?;
        self.forget(chat_id);
        Ok(report)
    }

    fn forget(&mut self, chat_id: Uuid) {
        self.directory.remove_local(chat_id);
        if self.selected_chat_id() == Some(chat_id) {
            self.close_chat();
        }
    }

    /// Apply every pending realtime change to the list and the open chat.
    pub async fn sync(&mut self) -> usize {
        let open = self
            .selected_chat_id()
            .filter(|chat_id| self.directory.contains(*chat_id));
        let mut changed = self.directory.sync().await;

        if let Some(chat_id) = open {
            if !self.directory.contains(chat_id) {
                info!("Open chat {} went away", chat_id);
                self.close_chat();
            }
        }

        if let Some(selected) = self.selected.as_mut() {
            changed += selected.stream.sync();
            changed += selected.typing.sync();
        }
        changed
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.close_chat();
        self.directory.unsubscribe();
    }
}
