use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;
use uuid::Uuid;

use agora_types::events::{RowChange, Topic};

use crate::hub::Registry;

/// Owned handle to one topic subscription.
///
/// Call [`Subscription::unsubscribe`] on teardown (chat switched, component
/// closed). Dropping the handle has the same effect.
pub struct Subscription<T: Clone + Send + 'static> {
    registry: Arc<Registry<T>>,
    key: Uuid,
    rx: Option<broadcast::Receiver<RowChange<T>>>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    pub(crate) fn new(
        registry: Arc<Registry<T>>,
        key: Uuid,
        rx: broadcast::Receiver<RowChange<T>>,
    ) -> Self {
        Self {
            registry,
            key,
            rx: Some(rx),
        }
    }

    pub fn topic(&self) -> Topic {
        self.registry.topic(self.key)
    }

    /// Wait for the next change. A lagging receiver skips what it missed.
    pub async fn recv(&mut self) -> Option<RowChange<T>> {
        let topic = self.topic();
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(change) => return Some(change),
                Err(RecvError::Lagged(n)) => {
                    warn!("Subscriber on {:?} lagged by {} events", topic, n);
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next already-delivered change without waiting.
    pub fn try_recv(&mut self) -> Option<RowChange<T>> {
        let topic = self.topic();
        let rx = self.rx.as_mut()?;
        loop {
            match rx.try_recv() {
                Ok(change) => return Some(change),
                Err(TryRecvError::Lagged(n)) => {
                    warn!("Subscriber on {:?} lagged by {} events", topic, n);
                    continue;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain every change delivered so far.
    pub fn drain(&mut self) -> Vec<RowChange<T>> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl<T: Clone + Send + 'static> Drop for Subscription<T> {
    fn drop(&mut self) {
        // Receiver must be gone before the registry checks receiver_count.
        drop(self.rx.take());
        self.registry.prune(self.key);
    }
}
