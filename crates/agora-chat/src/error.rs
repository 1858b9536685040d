use uuid::Uuid;

pub type Result<T, E = ChatError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Rejected locally, before any I/O.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The acting user may not do this. Nothing was changed.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Object storage refused the upload. Nothing was written.
    #[error("upload failed: {0}")]
    Upload(#[source] anyhow::Error),

    /// Transient persistence failure. Local state is left as it was.
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),

    /// A chat deletion failed after its retry. Some dependent rows may be
    /// gone while the chat row is still present; the deletion is recorded
    /// as pending and can be resumed.
    #[error("chat {chat_id} was only partially deleted: {source}")]
    IncompleteCleanup {
        chat_id: Uuid,
        #[source]
        source: anyhow::Error,
    },
}

impl ChatError {
    /// Worth retrying later without changing the request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::Upload(_) | Self::IncompleteCleanup { .. }
        )
    }
}
