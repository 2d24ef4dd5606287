use std::path::PathBuf;
use std::sync::Arc;

use crate::app::{AppState, AppStateError};
use crate::config::LoadError;
use crate::executor::KeySender;
use crate::pipeline::Pipeline;
use crate::watch::{watch_store, ReloadEvent, WatchHandle};
use notify::Error as NotifyError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(thiserror::Error, Debug)]
pub enum RuntimeManagerError {
    #[error("app state error: {0}")]
    App(#[from] AppStateError),
    #[error("settings error: {0}")]
    Settings(#[from] LoadError),
    #[error("watch error: {0}")]
    Watch(#[from] NotifyError),
}

/// Owns the loaded state, the pipeline and the store watcher, and keeps the
/// pipeline's snapshot in step with the store file.
pub struct RuntimeManager {
    pub state: Arc<Mutex<AppState>>,
    pub pipeline: Arc<Pipeline>,
    watch: WatchHandle,
    listener: JoinHandle<()>,
}

impl RuntimeManager {
    pub async fn initialize(
        settings_path: PathBuf,
        store_override: Option<PathBuf>,
        key_sender: Arc<dyn KeySender>,
    ) -> Result<Self, RuntimeManagerError> {
        let app_state = AppState::initialize(settings_path, store_override)?;
        let gestures: Vec<&str> = app_state.catalog().iter().map(|g| g.id.as_str()).collect();
        info!(
            settings = %app_state.settings_path().display(),
            store = %app_state.store_path().display(),
            ?gestures,
            "runtime state loaded"
        );
        for diag in app_state.diagnostics() {
            warn!(path = %diag.path, severity = ?diag.severity, "{}", diag.message);
        }

        let config = app_state.settings.pipeline_config()?;
        let pipeline = Arc::new(Pipeline::new(
            config,
            key_sender,
            app_state.catalog().clone(),
        ));
        pipeline.refresh_snapshot(app_state.snapshot());

        let store_path = app_state.store_path().to_path_buf();
        let state = Arc::new(Mutex::new(app_state));
        let watch = watch_store(store_path, state.clone())?;
        let mut rx = watch.subscribe();
        let state_clone = state.clone();
        let pipeline_clone = pipeline.clone();
        let listener = tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let ReloadEvent::Reloaded = event {
                    let guard = state_clone.lock().await;
                    pipeline_clone.refresh_snapshot(guard.snapshot());
                    info!(
                        bindings = guard.snapshot().bindings.len(),
                        macros = guard.snapshot().macros.len(),
                        "pipeline snapshot refreshed"
                    );
                }
            }
        });

        Ok(Self {
            state,
            pipeline,
            watch,
            listener,
        })
    }

    pub async fn shutdown(self) {
        self.watch.join_handle.abort();
        self.listener.abort();
        match Arc::try_unwrap(self.pipeline) {
            Ok(pipeline) => pipeline.shutdown().await,
            Err(pipeline) => {
                if let Err(err) = pipeline.stop_detection().await {
                    warn!(error = %err, "detection did not stop cleanly");
                }
            }
        }
    }
}
