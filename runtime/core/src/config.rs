use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use std::{fs, io, path::PathBuf};

use macro_format::{GestureCatalog, StoreSnapshot};
use snapshot_builder::{
    build_from_path as builder_build_from_path, build_from_str as builder_build_from_str,
    BuildError,
};
use store_validator::schema::Settings;
use store_validator::{
    parse_settings_str, validate_settings, ConfigError, Location, Severity, ValidationIssue,
};
use thiserror::Error;

use crate::pipeline::PipelineConfig;
use crate::supervisor::{SupervisorConfig, WorkerConfig};
use crate::throttle::ThrottleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
}

impl From<Severity> for DiagnosticSeverity {
    fn from(value: Severity) -> Self {
        match value {
            Severity::Error => DiagnosticSeverity::Error,
            Severity::Warning => DiagnosticSeverity::Warning,
            Severity::Info => DiagnosticSeverity::Info,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub path: String,
    pub message: String,
    pub location: Option<Location>,
    pub severity: DiagnosticSeverity,
}

#[derive(Debug)]
pub struct LoadedSettings {
    pub path: Option<PathBuf>,
    pub settings: Settings,
    pub diagnostics: Vec<Diagnostic>,
}

impl LoadedSettings {
    fn base_dir(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }

    fn resolve(&self, relative: &Path) -> PathBuf {
        match self.base_dir() {
            Some(base) if relative.is_relative() => base.join(relative),
            _ => relative.to_path_buf(),
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.resolve(&self.settings.store.path)
    }

    pub fn worker_dir(&self) -> PathBuf {
        self.resolve(&self.settings.worker.working_dir)
    }

    pub fn ingest_addr(&self) -> Result<SocketAddr, LoadError> {
        let ingest = &self.settings.ingest;
        (ingest.host.as_str(), ingest.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| LoadError::Address(format!("{}:{}", ingest.host, ingest.port)))
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig, LoadError> {
        let settings = &self.settings;
        let worker = WorkerConfig {
            program: settings.worker.program.clone(),
            args: settings.worker.args.clone(),
            working_dir: self.worker_dir(),
        };
        let mut config = PipelineConfig::new(SupervisorConfig::new(self.ingest_addr()?, worker));
        config.inter_action_delay = Duration::from_millis(settings.sequencer.inter_action_delay_ms);
        config.throttle = ThrottleConfig {
            suppress_window: Duration::from_millis(settings.notifications.suppress_window_ms),
            auto_dismiss: Duration::from_millis(settings.notifications.auto_dismiss_ms),
        };
        Ok(config)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error while reading settings: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] ConfigError),
    #[error("Validation errors prevented loading")]
    Validation(Vec<Diagnostic>),
    #[error("Ingest address `{0}` did not resolve")]
    Address(String),
}

pub fn load_settings_from_path(path: impl AsRef<Path>) -> Result<LoadedSettings, LoadError> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(path_ref)?;
    let mut loaded = load_settings_from_str(&content)?;
    loaded.path = Some(path_ref.to_path_buf());
    Ok(loaded)
}

pub fn load_settings_from_str(content: &str) -> Result<LoadedSettings, LoadError> {
    let settings = parse_settings_str(content)?;
    let diagnostics = convert_issues(validate_settings(&settings, content));

    if diagnostics
        .iter()
        .any(|diag| diag.severity == DiagnosticSeverity::Error)
    {
        return Err(LoadError::Validation(diagnostics));
    }

    Ok(LoadedSettings {
        path: None,
        settings,
        diagnostics,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedStore {
    pub snapshot: StoreSnapshot,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Validation errors prevented the store snapshot build")]
    Validation(Vec<Diagnostic>),
    #[error("Store snapshot build failed: {0}")]
    Build(BuildError),
}

/// A store file that does not exist yet is an empty store: the UI creates
/// it on first save.
pub fn load_store_from_path(
    path: impl AsRef<Path>,
    catalog: &GestureCatalog,
) -> Result<LoadedStore, StoreError> {
    match builder_build_from_path(path, catalog) {
        Ok(output) => Ok(LoadedStore {
            snapshot: output.snapshot,
            diagnostics: convert_issues(output.diagnostics),
        }),
        Err(BuildError::Io(err)) if err.kind() == io::ErrorKind::NotFound => Ok(LoadedStore {
            snapshot: StoreSnapshot::empty(),
            diagnostics: Vec::new(),
        }),
        Err(err) => Err(store_error(err)),
    }
}

pub fn load_store_from_str(
    content: &str,
    catalog: &GestureCatalog,
) -> Result<LoadedStore, StoreError> {
    builder_build_from_str(content, catalog)
        .map(|output| LoadedStore {
            snapshot: output.snapshot,
            diagnostics: convert_issues(output.diagnostics),
        })
        .map_err(store_error)
}

fn store_error(err: BuildError) -> StoreError {
    match err {
        BuildError::Validation(issues) => StoreError::Validation(convert_issues(issues)),
        other => StoreError::Build(other),
    }
}

fn convert_issues(issues: Vec<ValidationIssue>) -> Vec<Diagnostic> {
    issues.into_iter().map(convert_issue).collect()
}

fn convert_issue(issue: ValidationIssue) -> Diagnostic {
    Diagnostic {
        path: issue.path,
        message: issue.message,
        location: issue.location,
        severity: DiagnosticSeverity::from(issue.severity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use macro_format::Action;

    #[test]
    fn empty_settings_use_defaults() {
        let loaded = load_settings_from_str("").expect("defaults");
        assert_eq!(loaded.settings, Settings::default());
        assert_eq!(
            loaded.ingest_addr().expect("addr"),
            "127.0.0.1:5050".parse::<SocketAddr>().expect("addr")
        );
        assert!(loaded.diagnostics.is_empty());
    }

    #[test]
    fn invalid_settings_error() {
        let yaml = "version: 2\ningest:\n  port: 0\n";
        match load_settings_from_str(yaml).unwrap_err() {
            LoadError::Validation(diags) => {
                assert_eq!(diags.len(), 2);
                assert!(diags
                    .iter()
                    .all(|d| d.severity == DiagnosticSeverity::Error));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn relative_paths_resolve_against_the_settings_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("settings.yaml");
        fs::write(
            &path,
            "worker:\n  working_dir: detector\nstore:\n  path: data/store.json\nsequencer:\n  inter_action_delay_ms: 250\n",
        )
        .expect("write settings");

        let loaded = load_settings_from_path(&path).expect("load");
        assert_eq!(loaded.worker_dir(), dir.path().join("detector"));
        assert_eq!(loaded.store_path(), dir.path().join("data/store.json"));

        let config = loaded.pipeline_config().expect("pipeline config");
        assert_eq!(config.inter_action_delay, Duration::from_millis(250));
        assert_eq!(config.supervisor.worker.working_dir, dir.path().join("detector"));
        assert_eq!(config.throttle, ThrottleConfig::default());
    }

    #[test]
    fn missing_store_file_is_an_empty_store() {
        let dir = tempfile::tempdir().expect("temp dir");
        let loaded = load_store_from_path(dir.path().join("store.json"), &GestureCatalog::builtin())
            .expect("empty store");
        assert!(loaded.snapshot.bindings.is_empty());
        assert!(loaded.snapshot.macros.is_empty());
    }

    #[test]
    fn store_with_warnings_still_loads() {
        let json = r#"{
  "macros": [{"name": "Copy", "actions": [{"type": "keypress", "value": "Ctrl + C"}]}],
  "mappings": [{"name": "wave", "leftGestureId": "wave", "macro": "Copy"}]
}"#;
        let loaded = load_store_from_str(json, &GestureCatalog::builtin()).expect("load");
        assert_eq!(loaded.snapshot.bindings.len(), 1);
        assert!(loaded.snapshot.bindings[0].enabled);
        assert_eq!(
            loaded.snapshot.macros[0].actions,
            vec![Action::Keypress {
                combo: "Ctrl + C".into()
            }]
        );
        assert!(loaded
            .diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Warning));
    }

    #[test]
    fn duplicate_binding_names_fail_the_store() {
        let json = r#"{
  "macros": [],
  "mappings": [
    {"name": "dup", "leftGestureId": "fist", "macro": "A"},
    {"name": "dup", "rightGestureId": "peace", "macro": "B"}
  ]
}"#;
        match load_store_from_str(json, &GestureCatalog::builtin()).unwrap_err() {
            StoreError::Validation(diags) => {
                assert!(diags.iter().any(|d| d.severity == DiagnosticSeverity::Error));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
