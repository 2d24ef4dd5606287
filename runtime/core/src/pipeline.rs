//! Wires ingest, matching, sequencing and alerting together and exposes the
//! command surface the UI drives.

use std::sync::Arc;
use std::time::Duration;

use macro_format::{Binding, GestureCatalog, Macro, StoreSnapshot};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::{publish, status_channel, ChannelNotifier, StatusEvent, StatusSender};
use crate::executor::{ActionExecutor, KeySender};
use crate::ingest::{EventSource, GestureEvent, GestureSender};
use crate::matcher::BindingMatcher;
use crate::sequencer::{MacroSequencer, RunReport, SequencerError, DEFAULT_INTER_ACTION_DELAY};
use crate::supervisor::{DetectionState, SupervisorConfig, SupervisorError, WorkerSupervisor};
use crate::throttle::{Alert, NotificationThrottle, ThrottleConfig};

/// Alert stream shared by every gesture detection.
pub const GESTURE_ALERT_STREAM: &str = "gesture-detected";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub supervisor: SupervisorConfig,
    pub inter_action_delay: Duration,
    pub throttle: ThrottleConfig,
}

impl PipelineConfig {
    pub fn new(supervisor: SupervisorConfig) -> Self {
        Self {
            supervisor,
            inter_action_delay: DEFAULT_INTER_ACTION_DELAY,
            throttle: ThrottleConfig::default(),
        }
    }
}

#[derive(Clone)]
struct Dispatch {
    matcher: BindingMatcher,
    sequencer: MacroSequencer,
    throttle: NotificationThrottle,
    catalog: Arc<GestureCatalog>,
    status: StatusSender,
}

pub struct Pipeline {
    supervisor: WorkerSupervisor,
    dispatch: Dispatch,
    gestures: GestureSender,
    dispatcher: JoinHandle<()>,
}

impl Pipeline {
    /// Builds the pipeline and starts its dispatcher. Detection stays idle
    /// until `start_detection` is called.
    pub fn new(config: PipelineConfig, key_sender: Arc<dyn KeySender>, catalog: GestureCatalog) -> Self {
        let status = status_channel();
        let (gestures, gesture_rx) = mpsc::unbounded_channel();

        let executor = ActionExecutor::new(key_sender);
        let dispatch = Dispatch {
            matcher: BindingMatcher::new(),
            sequencer: MacroSequencer::new(executor, config.inter_action_delay),
            throttle: NotificationThrottle::new(
                config.throttle,
                Arc::new(ChannelNotifier::new(status.clone())),
            ),
            catalog: Arc::new(catalog),
            status: status.clone(),
        };
        let supervisor = WorkerSupervisor::new(config.supervisor, gestures.clone(), status);
        let dispatcher = tokio::spawn(dispatch_events(gesture_rx, dispatch.clone()));

        Self {
            supervisor,
            dispatch,
            gestures,
            dispatcher,
        }
    }

    pub async fn start_detection(&self) -> Result<(), SupervisorError> {
        self.supervisor.start().await
    }

    /// Macros already in flight keep running.
    pub async fn stop_detection(&self) -> Result<(), SupervisorError> {
        self.supervisor.stop().await
    }

    pub fn detection_state(&self) -> DetectionState {
        self.supervisor.status()
    }

    pub fn supervisor(&self) -> &WorkerSupervisor {
        &self.supervisor
    }

    /// Manual trigger that bypasses the matcher.
    pub async fn run_macro_now(&self, macro_name: &str) -> Result<RunReport, SequencerError> {
        let report = self.dispatch.sequencer.run(macro_name).await?;
        publish_finished(&self.dispatch.status, &report);
        Ok(report)
    }

    pub fn refresh_bindings(&self, bindings: Vec<Binding>) {
        self.dispatch.matcher.refresh(bindings);
    }

    pub fn refresh_macros(&self, macros: Vec<Macro>) {
        self.dispatch.sequencer.refresh(macros);
    }

    pub fn refresh_snapshot(&self, snapshot: &StoreSnapshot) {
        self.refresh_bindings(snapshot.bindings.clone());
        self.refresh_macros(snapshot.macros.clone());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.dispatch.status.subscribe()
    }

    pub fn catalog(&self) -> &GestureCatalog {
        &self.dispatch.catalog
    }

    /// Feeds a gesture straight into the dispatcher as if the worker had sent it.
    pub fn inject_gesture(&self, gesture_id: impl Into<String>) -> bool {
        self.gestures
            .send(GestureEvent::new(gesture_id, EventSource::Injected))
            .is_ok()
    }

    /// Stops detection and the dispatcher. In-flight macro runs are detached
    /// and finish on their own.
    pub async fn shutdown(self) {
        if let Err(err) = self.supervisor.stop().await {
            warn!(error = %err, "detection did not stop cleanly");
        }
        self.dispatcher.abort();
        info!("pipeline shut down");
    }
}

async fn dispatch_events(mut rx: mpsc::UnboundedReceiver<GestureEvent>, dispatch: Dispatch) {
    while let Some(event) = rx.recv().await {
        dispatch.handle(event);
    }
    debug!("gesture channel closed; dispatcher exiting");
}

impl Dispatch {
    fn handle(&self, event: GestureEvent) {
        let resolution = self.matcher.resolve(&event.gesture_id);
        let (display_name, display_symbol) = match self.catalog.get(&event.gesture_id) {
            Some(gesture) => (gesture.display_name.clone(), gesture.display_symbol.clone()),
            None => {
                debug!(gesture = %event.gesture_id, "gesture not in catalog");
                (event.gesture_id.clone(), String::new())
            }
        };
        info!(
            gesture = %event.gesture_id,
            source = ?event.source,
            matches = resolution.matches.len(),
            "gesture detected"
        );

        publish(
            &self.status,
            StatusEvent::GestureDetected {
                gesture_id: event.gesture_id.clone(),
                display_name: display_name.clone(),
                display_symbol: display_symbol.clone(),
                matched_binding_names: resolution.binding_names(),
            },
        );

        let body = format!("{display_symbol} {display_name}").trim().to_string();
        self.throttle.offer(
            GESTURE_ALERT_STREAM,
            Alert {
                title: "Gesture detected".to_string(),
                body,
            },
        );

        let Some(binding) = resolution.triggering() else {
            return;
        };
        let sequencer = self.sequencer.clone();
        let status = self.status.clone();
        let binding_name = binding.name.clone();
        let macro_name = binding.macro_name.clone();
        tokio::spawn(async move {
            match sequencer.run(&macro_name).await {
                Ok(report) => publish_finished(&status, &report),
                Err(err) => warn!(binding = %binding_name, error = %err, "bound macro did not run"),
            }
        });
    }
}

fn publish_finished(status: &StatusSender, report: &RunReport) {
    publish(
        status,
        StatusEvent::MacroFinished {
            macro_name: report.macro_name.clone(),
            completed: report.completed(),
            failed: report.failed(),
            skipped: report.skipped(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::LoggingKeySender;
    use crate::supervisor::WorkerConfig;
    use macro_format::Action;

    fn pipeline(key_sender: Arc<LoggingKeySender>) -> Pipeline {
        let supervisor = SupervisorConfig::new(
            "127.0.0.1:0".parse().expect("addr"),
            WorkerConfig {
                program: "sleep".into(),
                args: vec!["30".into()],
                working_dir: std::env::temp_dir(),
            },
        );
        let mut config = PipelineConfig::new(supervisor);
        config.inter_action_delay = Duration::from_millis(10);
        let pipeline = Pipeline::new(config, key_sender, GestureCatalog::builtin());
        pipeline.refresh_macros(vec![Macro {
            name: "Copy".into(),
            actions: vec![
                Action::Keypress {
                    combo: "Ctrl + C".into(),
                },
                Action::Unknown {
                    tag: "mouse".into(),
                    value: "click".into(),
                },
            ],
        }]);
        pipeline.refresh_bindings(vec![Binding {
            name: "fist-copy".into(),
            left_gesture_id: None,
            right_gesture_id: Some("fist".into()),
            macro_name: "Copy".into(),
            enabled: true,
        }]);
        pipeline
    }

    async fn next_event(rx: &mut broadcast::Receiver<StatusEvent>) -> StatusEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for status")
            .expect("status channel closed")
    }

    #[tokio::test]
    async fn injected_gesture_runs_the_bound_macro() {
        let keys = Arc::new(LoggingKeySender::new());
        let pipeline = pipeline(keys.clone());
        let mut rx = pipeline.subscribe();

        assert!(pipeline.inject_gesture("fist"));

        let mut detected = None;
        let mut finished = None;
        while detected.is_none() || finished.is_none() {
            match next_event(&mut rx).await {
                event @ StatusEvent::GestureDetected { .. } => detected = Some(event),
                event @ StatusEvent::MacroFinished { .. } => finished = Some(event),
                _ => {}
            }
        }
        assert_eq!(
            detected,
            Some(StatusEvent::GestureDetected {
                gesture_id: "fist".into(),
                display_name: "Fist".into(),
                display_symbol: "✊".into(),
                matched_binding_names: vec!["fist-copy".into()],
            })
        );
        assert_eq!(
            finished,
            Some(StatusEvent::MacroFinished {
                macro_name: "Copy".into(),
                completed: 1,
                failed: 0,
                skipped: 1,
            })
        );
        assert_eq!(keys.sent().len(), 1);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn unmatched_gesture_is_reported_without_running_anything() {
        let keys = Arc::new(LoggingKeySender::new());
        let pipeline = pipeline(keys.clone());
        let mut rx = pipeline.subscribe();

        pipeline.inject_gesture("peace");
        loop {
            if let StatusEvent::GestureDetected {
                gesture_id,
                matched_binding_names,
                ..
            } = next_event(&mut rx).await
            {
                assert_eq!(gesture_id, "peace");
                assert!(matched_binding_names.is_empty());
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(keys.sent().is_empty());
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn run_macro_now_bypasses_the_matcher() {
        let keys = Arc::new(LoggingKeySender::new());
        let pipeline = pipeline(keys.clone());

        let report = pipeline.run_macro_now("Copy").await.expect("run");
        assert_eq!(report.completed(), 1);
        assert_eq!(keys.sent().len(), 1);

        let err = pipeline.run_macro_now("missing-macro").await.expect_err("missing");
        assert_eq!(err, SequencerError::MacroNotFound("missing-macro".into()));
        assert_eq!(keys.sent().len(), 1);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn dangling_macro_reference_is_not_fatal() {
        let keys = Arc::new(LoggingKeySender::new());
        let pipeline = pipeline(keys.clone());
        pipeline.refresh_bindings(vec![Binding {
            name: "dangling".into(),
            left_gesture_id: Some("fist".into()),
            right_gesture_id: None,
            macro_name: "Gone".into(),
            enabled: true,
        }]);

        pipeline.inject_gesture("fist");
        pipeline.inject_gesture("fist");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(keys.sent().is_empty());
        assert!(pipeline.inject_gesture("open_hand"));
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn repeated_gestures_raise_one_alert() {
        let keys = Arc::new(LoggingKeySender::new());
        let pipeline = pipeline(keys);
        let mut rx = pipeline.subscribe();

        pipeline.inject_gesture("peace");
        pipeline.inject_gesture("peace");
        let mut detections = 0;
        let mut alerts = 0;
        while detections < 2 {
            match next_event(&mut rx).await {
                StatusEvent::GestureDetected { .. } => detections += 1,
                StatusEvent::AlertShown { .. } => alerts += 1,
                _ => {}
            }
        }
        while let Ok(event) = rx.try_recv() {
            if matches!(event, StatusEvent::AlertShown { .. }) {
                alerts += 1;
            }
        }
        assert_eq!(alerts, 1);
        pipeline.shutdown().await;
    }
}
