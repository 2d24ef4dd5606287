use std::path::PathBuf;

use macro_format::{Binding, Macro};
use serde::Deserialize;

pub const DEFAULT_INGEST_HOST: &str = "127.0.0.1";
pub const DEFAULT_INGEST_PORT: u16 = 5050;
pub const DEFAULT_INTER_ACTION_DELAY_MS: u64 = 500;
pub const DEFAULT_SUPPRESS_WINDOW_MS: u64 = 3000;
pub const DEFAULT_AUTO_DISMISS_MS: u64 = 2000;

/// The flat key-value store document written by the UI layer.
#[derive(Debug, Deserialize, Default)]
pub struct StoreDocument {
    #[serde(default)]
    pub macros: Vec<Macro>,
    #[serde(default, alias = "bindings")]
    pub mappings: Vec<Binding>,
}

/// Runtime settings file (YAML).
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub version: u32,
    pub ingest: IngestSettings,
    pub worker: WorkerSettings,
    pub sequencer: SequencerSettings,
    pub notifications: NotificationSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: 1,
            ingest: IngestSettings::default(),
            worker: WorkerSettings::default(),
            sequencer: SequencerSettings::default(),
            notifications: NotificationSettings::default(),
            store: StoreSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct IngestSettings {
    pub host: String,
    pub port: u16,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_INGEST_HOST.to_string(),
            port: DEFAULT_INGEST_PORT,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WorkerSettings {
    pub program: String,
    pub args: Vec<String>,
    /// The worker's resource bundle; its working directory is pinned here.
    pub working_dir: PathBuf,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            args: vec!["Detector.py".to_string()],
            working_dir: PathBuf::from("gesture-detection"),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SequencerSettings {
    pub inter_action_delay_ms: u64,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            inter_action_delay_ms: DEFAULT_INTER_ACTION_DELAY_MS,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct NotificationSettings {
    pub suppress_window_ms: u64,
    pub auto_dismiss_ms: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            suppress_window_ms: DEFAULT_SUPPRESS_WINDOW_MS,
            auto_dismiss_ms: DEFAULT_AUTO_DISMISS_MS,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StoreSettings {
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("store.json"),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct LoggingSettings {
    pub debug: bool,
}
