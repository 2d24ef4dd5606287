pub mod app;
pub mod config;
pub mod events;
pub mod executor;
pub mod ingest;
pub mod logging;
pub mod matcher;
pub mod pipeline;
pub mod runtime;
pub mod sequencer;
pub mod supervisor;
pub mod throttle;
pub mod watch;

pub use app::{AppState, AppStateError};
pub use config::{
    load_settings_from_path, load_settings_from_str, load_store_from_path, load_store_from_str,
    Diagnostic, DiagnosticSeverity, LoadError, LoadedSettings, LoadedStore, StoreError,
};
pub use events::{ChannelNotifier, StatusEvent};
pub use executor::{
    parse_combo, ActionError, ActionExecutor, DefaultKeySender, KeySender, LoggingKeySender,
    ParsedCombo,
};
pub use ingest::{GestureEvent, IngestError, IngestServer};
pub use matcher::{BindingMatcher, Resolution};
pub use pipeline::{Pipeline, PipelineConfig};
pub use runtime::{RuntimeManager, RuntimeManagerError};
pub use sequencer::{MacroSequencer, RunReport, SequencerError};
pub use supervisor::{DetectionState, SupervisorConfig, SupervisorError, WorkerSupervisor};
pub use throttle::{Alert, NotificationThrottle, Notifier, ThrottleConfig};
pub use watch::{watch_store, ReloadEvent, WatchHandle};
