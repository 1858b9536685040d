use std::time::Duration;

/// Tunables for the chat components.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// How long a "typing" indicator stays up after the last signal.
    pub typing_window: Duration,
    /// Typing signals older than this when observed are ignored.
    pub typing_stale_after: Duration,
    /// Most recent messages loaded when a chat is opened.
    pub message_limit: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            typing_window: Duration::from_secs(3),
            typing_stale_after: Duration::from_secs(5),
            message_limit: 500,
        }
    }
}
