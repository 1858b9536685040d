//! Realtime chat subsystem: chat directory, per-chat message streams with
//! optimistic/realtime reconciliation, typing presence, notification
//! fan-out and chat lifecycle (creation, membership, cascading deletion).
//!
//! Every operation takes an explicit [`Session`] naming the acting user.

pub mod backend;
pub mod client;
pub mod config;
pub mod deletion;
pub mod directory;
pub mod error;
pub mod fanout;
pub mod lifecycle;
pub mod presence;
pub mod session;
pub mod stream;

pub use backend::{Backend, FileUpload};
pub use client::ChatClient;
pub use config::ChatConfig;
pub use deletion::{ChatDeletion, DeletionPhase, DeletionReport};
pub use directory::ChatDirectory;
pub use error::{ChatError, Result};
pub use lifecycle::{ChatCreated, GroupDraft};
pub use presence::TypingObserver;
pub use session::Session;
pub use stream::{MessageDraft, MessageStream, SendOutcome};
