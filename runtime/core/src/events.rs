//! One-directional status push from the pipeline to whatever UI is attached.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::throttle::{Alert, AlertId, Notifier};

const STATUS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    DetectionChanged {
        detecting: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    GestureDetected {
        gesture_id: String,
        display_name: String,
        display_symbol: String,
        matched_binding_names: Vec<String>,
    },
    MacroFinished {
        macro_name: String,
        completed: usize,
        failed: usize,
        skipped: usize,
    },
    AlertShown {
        id: AlertId,
        title: String,
        body: String,
    },
    AlertClosed {
        id: AlertId,
    },
}

pub type StatusSender = broadcast::Sender<StatusEvent>;

pub fn status_channel() -> StatusSender {
    let (tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
    tx
}

/// Publishes a status event; having no subscriber is not an error.
pub fn publish(status: &StatusSender, event: StatusEvent) {
    let _ = status.send(event);
}

/// Alerts delivered as status events for the UI to render.
pub struct ChannelNotifier {
    status: StatusSender,
}

impl ChannelNotifier {
    pub fn new(status: StatusSender) -> Self {
        Self { status }
    }
}

impl Notifier for ChannelNotifier {
    fn show(&self, id: AlertId, alert: &Alert) {
        publish(
            &self.status,
            StatusEvent::AlertShown {
                id,
                title: alert.title.clone(),
                body: alert.body.clone(),
            },
        );
    }

    fn close(&self, id: AlertId) {
        publish(&self.status, StatusEvent::AlertClosed { id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_changes_serialize_for_the_ui() {
        let json = serde_json::to_value(StatusEvent::DetectionChanged {
            detecting: false,
            error: None,
        })
        .expect("serialize");
        assert_eq!(json, serde_json::json!({"event": "detection_changed", "detecting": false}));
    }

    #[test]
    fn channel_notifier_publishes_alerts() {
        let status = status_channel();
        let mut rx = status.subscribe();
        let notifier = ChannelNotifier::new(status);
        notifier.show(
            7,
            &Alert {
                title: "Gesture".into(),
                body: "Fist".into(),
            },
        );
        notifier.close(7);
        assert!(matches!(rx.try_recv(), Ok(StatusEvent::AlertShown { id: 7, .. })));
        assert_eq!(rx.try_recv().ok(), Some(StatusEvent::AlertClosed { id: 7 }));
    }
}
