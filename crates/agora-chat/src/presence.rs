//! Typing presence: broadcasting "I am typing" and tracking who else is.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use agora_realtime::Subscription;
use agora_types::events::RowChange;
use agora_types::models::TypingSignal;

use crate::backend::Backend;
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::session::Session;

/// Record that the acting user is typing in `chat_id`.
pub async fn notify_typing(backend: &Backend, session: Session, chat_id: Uuid) -> Result<TypingSignal> {
    let signal = TypingSignal {
        id: Uuid::new_v4(),
        chat_id,
        user_id: session.user_id,
        created_at: agora_db::now(),
    };

    let row = signal.clone();
    let inserted = backend
        .db_call(move |db| {
            if !db.is_member(row.chat_id, row.user_id)? {
                return Ok(false);
            }
            db.insert_typing(&row)?;
            Ok(true)
        })
        .await?;

    if !inserted {
        return Err(ChatError::Forbidden(format!("not a member of chat {}", chat_id)));
    }
    Ok(signal)
}

/// Tracks which other users are currently typing in one chat.
///
/// Each observed signal (re)starts a per-user window; a user counts as
/// typing until that window runs out without a newer signal.
pub struct TypingObserver {
    viewer: Uuid,
    chat_id: Uuid,
    window: Duration,
    stale_after: Duration,
    deadlines: HashMap<Uuid, Instant>,
    subscription: Option<Subscription<TypingSignal>>,
}

impl TypingObserver {
    /// An observer with no realtime feed; changes are fed via [`observe`](Self::observe).
    pub fn new(viewer: Uuid, chat_id: Uuid, config: &ChatConfig) -> Self {
        Self {
            viewer,
            chat_id,
            window: config.typing_window,
            stale_after: config.typing_stale_after,
            deadlines: HashMap::new(),
            subscription: None,
        }
    }

    pub fn subscribe(backend: &Backend, session: Session, chat_id: Uuid) -> Self {
        let mut observer = Self::new(session.user_id, chat_id, backend.config());
        observer.subscription = Some(backend.hub().subscribe_typing(chat_id));
        observer
    }

    pub fn chat_id(&self) -> Uuid {
        self.chat_id
    }

    /// Returns whether the change (re)started someone's typing window.
    pub fn observe(&mut self, change: RowChange<TypingSignal>) -> bool {
        let RowChange::Insert(signal) = change else {
            return false;
        };
        if signal.chat_id != self.chat_id || signal.user_id == self.viewer {
            return false;
        }

        let age = Utc::now().signed_duration_since(signal.created_at);
        if age.to_std().is_ok_and(|age| age > self.stale_after) {
            debug!("Ignoring stale typing signal {} ({}ms old)", signal.id, age.num_milliseconds());
            return false;
        }

        self.deadlines.insert(signal.user_id, Instant::now() + self.window);
        true
    }

    /// Observe every signal delivered so far.
    pub fn sync(&mut self) -> usize {
        let changes = match self.subscription.as_mut() {
            Some(subscription) => subscription.drain(),
            None => return 0,
        };
        changes
            .into_iter()
            .map(|change| self.observe(change))
            .filter(|started| *started)
            .count()
    }

    /// Wait for the next signal and observe it. `None` once unsubscribed.
    pub async fn next_signal(&mut self) -> Option<bool> {
        let change = self.subscription.as_mut()?.recv().await?;
        Some(self.observe(change))
    }

    pub fn is_typing(&self) -> bool {
        let now = Instant::now();
        self.deadlines.values().any(|deadline| *deadline > now)
    }

    /// Users whose window is still open, sorted.
    pub fn typing_users(&self) -> Vec<Uuid> {
        let now = Instant::now();
        let mut users: Vec<Uuid> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline > now)
            .map(|(user, _)| *user)
            .collect();
        users.sort();
        users
    }

    pub fn is_user_typing(&self, user_id: Uuid) -> bool {
        self.deadlines
            .get(&user_id)
            .is_some_and(|deadline| *deadline > Instant::now())
    }

    /// Time until the last open window closes.
    pub fn expires_in(&self) -> Option<Duration> {
        let now = Instant::now();
        self.deadlines
            .values()
            .filter(|deadline| **deadline > now)
            .max()
            .map(|deadline| *deadline - now)
    }

    pub fn unsubscribe(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.deadlines.clear();
    }
}

/// Delete typing rows older than `retention`.
pub async fn purge_stale_typing(backend: &Backend, retention: Duration) -> Result<usize> {
    let retention = chrono::Duration::from_std(retention)
        .map_err(|e| ChatError::Validation(format!("typing retention out of range: {}", e)))?;
    let cutoff = agora_db::now() - retention;
    Ok(backend.db_call(move |db| db.purge_typing_before(cutoff)).await?)
}

/// Background task that keeps `typing_status` from growing without bound.
pub async fn run_typing_purge_loop(backend: Backend, retention: Duration, every: Duration) {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;

        match purge_stale_typing(&backend, retention).await {
            Ok(count) => {
                if count > 0 {
                    info!("Typing purge: removed {} stale signals", count);
                }
            }
            Err(e) => {
                warn!("Typing purge error: {}", e);
            }
        }
    }
}
