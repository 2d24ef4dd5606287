use std::path::{Path, PathBuf};

use crate::config::{
    load_settings_from_path, load_store_from_path, Diagnostic, LoadError, LoadedSettings,
    LoadedStore, StoreError,
};
use macro_format::{GestureCatalog, StoreSnapshot};
use thiserror::Error;
use tracing::debug;

#[derive(Debug)]
pub struct AppState {
    settings_path: PathBuf,
    store_path: PathBuf,
    catalog: GestureCatalog,
    pub settings: LoadedSettings,
    pub store: LoadedStore,
}

#[derive(Debug, Error)]
pub enum AppStateError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] LoadError),
    #[error("Failed to load store: {0}")]
    Store(#[from] StoreError),
}

impl AppState {
    /// Loads settings, then the store they point at (or `store_override`).
    pub fn initialize(
        settings_path: impl Into<PathBuf>,
        store_override: Option<PathBuf>,
    ) -> Result<Self, AppStateError> {
        let settings_path = settings_path.into();
        let settings = load_settings_from_path(&settings_path)?;
        let store_path = store_override.unwrap_or_else(|| settings.store_path());
        let catalog = GestureCatalog::builtin();
        let store = load_store_from_path(&store_path, &catalog)?;
        Ok(Self {
            settings_path,
            store_path,
            catalog,
            settings,
            store,
        })
    }

    /// Re-reads the store. Returns `false` when the document is byte-for-byte
    /// the one already loaded. On error the previous snapshot stays in place.
    pub fn reload_store(&mut self) -> Result<bool, AppStateError> {
        let store = load_store_from_path(&self.store_path, &self.catalog)?;
        if store.snapshot.header.source_hash == self.store.snapshot.header.source_hash {
            debug!(path = %self.store_path.display(), "store unchanged");
            return Ok(false);
        }
        self.store = store;
        Ok(true)
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn catalog(&self) -> &GestureCatalog {
        &self.catalog
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.settings
            .diagnostics
            .iter()
            .chain(self.store.diagnostics.iter())
    }

    pub fn snapshot(&self) -> &StoreSnapshot {
        &self.store.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_store(combo: &str) -> String {
        format!(
            r#"{{
  "macros": [{{"name": "Copy", "actions": [{{"type": "keypress", "value": "{combo}"}}]}}],
  "mappings": [{{"name": "fist-copy", "rightGestureId": "fist", "macro": "Copy", "enabled": true}}]
}}"#
        )
    }

    #[test]
    fn initialize_loads_settings_and_store() {
        let dir = tempfile::tempdir().expect("temp dir");
        let settings_path = dir.path().join("settings.yaml");
        fs::write(&settings_path, "store:\n  path: store.json\n").expect("write settings");
        fs::write(dir.path().join("store.json"), sample_store("Ctrl + C")).expect("write store");

        let mut app = AppState::initialize(settings_path, None).expect("initialize");
        assert_eq!(app.store_path(), dir.path().join("store.json"));
        assert_eq!(app.snapshot().bindings.len(), 1);
        assert_eq!(app.diagnostics().count(), 0);

        assert!(!app.reload_store().expect("reload"));

        fs::write(dir.path().join("store.json"), sample_store("Ctrl + V")).expect("rewrite");
        assert!(app.reload_store().expect("reload"));
        assert_eq!(app.snapshot().macros[0].actions[0].value(), "Ctrl + V");
    }

    #[test]
    fn failed_reload_keeps_the_previous_snapshot() {
        let dir = tempfile::tempdir().expect("temp dir");
        let settings_path = dir.path().join("settings.yaml");
        let store_path = dir.path().join("elsewhere.json");
        fs::write(&settings_path, "version: 1\n").expect("write settings");
        fs::write(&store_path, sample_store("Ctrl + C")).expect("write store");

        let mut app =
            AppState::initialize(settings_path, Some(store_path.clone())).expect("initialize");
        fs::write(&store_path, "{ not json").expect("corrupt store");
        assert!(matches!(app.reload_store(), Err(AppStateError::Store(_))));
        assert_eq!(app.snapshot().macros[0].name, "Copy");
    }
}
