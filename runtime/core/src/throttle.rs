//! Rate-limits user-visible alerts so a held gesture does not cause an alert storm.
//! Has no say over whether macros run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

pub type AlertId = u64;

pub const DEFAULT_SUPPRESS_WINDOW: Duration = Duration::from_secs(3);
pub const DEFAULT_AUTO_DISMISS: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub body: String,
}

pub trait Notifier: Send + Sync {
    fn show(&self, id: AlertId, alert: &Alert);
    fn close(&self, id: AlertId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub suppress_window: Duration,
    pub auto_dismiss: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            suppress_window: DEFAULT_SUPPRESS_WINDOW,
            auto_dismiss: DEFAULT_AUTO_DISMISS,
        }
    }
}

#[derive(Debug)]
struct StreamState {
    last_shown: Instant,
    visible: Option<AlertId>,
}

struct Shared {
    config: ThrottleConfig,
    notifier: Arc<dyn Notifier>,
    streams: Mutex<HashMap<String, StreamState>>,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct NotificationThrottle {
    shared: Arc<Shared>,
}

impl NotificationThrottle {
    pub fn new(config: ThrottleConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                notifier,
                streams: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Shows `alert` unless the same stream showed one within the suppression
    /// window. Must be called from within a tokio runtime.
    pub fn offer(&self, stream: &str, alert: Alert) -> Option<AlertId> {
        let shared = &self.shared;
        let now = Instant::now();
        let mut streams = shared.streams.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(state) = streams.get(stream) {
            if now.duration_since(state.last_shown) < shared.config.suppress_window {
                debug!(stream, "alert suppressed");
                return None;
            }
        }

        if let Some(previous) = streams.get_mut(stream).and_then(|s| s.visible.take()) {
            shared.notifier.close(previous);
        }

        let id = shared.next_id.fetch_add(1, Ordering::SeqCst);
        shared.notifier.show(id, &alert);
        streams.insert(
            stream.to_string(),
            StreamState {
                last_shown: now,
                visible: Some(id),
            },
        );
        drop(streams);

        let throttle = self.clone();
        let stream = stream.to_string();
        let dismiss_at = now + shared.config.auto_dismiss;
        tokio::spawn(async move {
            tokio::time::sleep_until(dismiss_at).await;
            throttle.dismiss(&stream, id);
        });
        Some(id)
    }

    fn dismiss(&self, stream: &str, id: AlertId) {
        let mut streams = self
            .shared
            .streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = streams.get_mut(stream) {
            if state.visible == Some(id) {
                state.visible = None;
                self.shared.notifier.close(id);
            }
        }
    }
}
