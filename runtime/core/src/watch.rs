use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::{AppState, AppStateError};

const DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub enum ReloadEvent {
    Reloaded,
    Unchanged,
    Failed(Arc<AppStateError>),
}

pub struct WatchHandle {
    pub join_handle: JoinHandle<()>,
    event_tx: broadcast::Sender<ReloadEvent>,
    /// Keep watcher alive for lifetime of handle.
    _watcher: RecommendedWatcher,
}

impl WatchHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.event_tx.subscribe()
    }
}

/// Watches the store file's directory rather than the file itself: the UI
/// rewrites the store by replacing it, which a file watch would lose.
pub fn watch_store(path: PathBuf, state: Arc<Mutex<AppState>>) -> notify::Result<WatchHandle> {
    let (event_tx, _event_rx) = broadcast::channel(16);
    let (notify_tx, mut notify_rx) = mpsc::channel(16);

    let mut watcher = notify::recommended_watcher({
        let notify_tx = notify_tx.clone();
        move |res| {
            let _ = notify_tx.blocking_send(res);
        }
    })?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path.file_name().map(|name| name.to_os_string());
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!(path = %path.display(), "watching store");

    let event_tx_clone = event_tx.clone();
    let join_handle = tokio::spawn(async move {
        let event_tx = event_tx_clone;
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            if let Some(next_deadline) = deadline {
                tokio::select! {
                    Some(event) = notify_rx.recv() => {
                        match event {
                            Ok(ev) if is_relevant(&ev, file_name.as_ref()) => {
                                deadline = Some(tokio::time::Instant::now() + DEBOUNCE);
                            }
                            Ok(_) => {}
                            Err(err) => {
                                warn!(error = %err, "store watcher error");
                                break;
                            }
                        }
                    }
                    _ = tokio::time::sleep_until(next_deadline) => {
                        deadline = None;
                        reload_state(&state, &event_tx).await;
                    }
                }
            } else {
                match notify_rx.recv().await {
                    Some(Ok(event)) => {
                        if is_relevant(&event, file_name.as_ref()) {
                            deadline = Some(tokio::time::Instant::now() + DEBOUNCE);
                        }
                    }
                    Some(Err(err)) => {
                        // Ignore errors but re-check the store.
                        debug!(error = %err, "store watcher error");
                        deadline = Some(tokio::time::Instant::now() + DEBOUNCE);
                    }
                    None => break,
                }
            }
        }
    });

    Ok(WatchHandle {
        join_handle,
        event_tx,
        _watcher: watcher,
    })
}

fn is_relevant(event: &Event, file_name: Option<&OsString>) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) | EventKind::Other
    );
    kind_matches
        && match file_name {
            Some(name) => event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n == name.as_os_str()).unwrap_or(false)),
            None => true,
        }
}

async fn reload_state(state: &Arc<Mutex<AppState>>, event_tx: &broadcast::Sender<ReloadEvent>) {
    let mut guard = state.lock().await;
    let event = match guard.reload_store() {
        Ok(true) => {
            info!(path = %guard.store_path().display(), "store reloaded");
            ReloadEvent::Reloaded
        }
        Ok(false) => ReloadEvent::Unchanged,
        Err(err) => {
            warn!(error = %err, "store reload failed; keeping previous snapshot");
            ReloadEvent::Failed(Arc::new(err))
        }
    };
    let _ = event_tx.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppState;
    use std::fs;

    fn sample_store(macros: &[&str]) -> String {
        let macros: Vec<String> = macros
            .iter()
            .map(|name| {
                format!(r#"{{"name": "{name}", "actions": [{{"type": "keypress", "value": "Z"}}]}}"#)
            })
            .collect();
        format!(r#"{{"macros": [{}], "mappings": []}}"#, macros.join(", "))
    }

    fn setup(dir: &tempfile::TempDir) -> (PathBuf, Arc<Mutex<AppState>>) {
        let settings_path = dir.path().join("settings.yaml");
        let store_path = dir.path().join("store.json");
        fs::write(&settings_path, "version: 1\n").expect("write settings");
        fs::write(&store_path, sample_store(&["first"])).expect("write store");
        let state = Arc::new(Mutex::new(
            AppState::initialize(settings_path, None).expect("init"),
        ));
        (store_path, state)
    }

    #[tokio::test]
    async fn watcher_detects_changes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (store_path, state) = setup(&dir);

        let handle = watch_store(store_path.clone(), state.clone()).expect("watch");
        let mut rx = handle.subscribe();

        fs::write(&store_path, sample_store(&["first", "second"])).expect("rewrite store");

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timeout waiting for reload")
            .expect("channel closed");
        assert!(matches!(event, ReloadEvent::Reloaded));
        assert_eq!(state.lock().await.snapshot().macros.len(), 2);
        handle.join_handle.abort();
    }

    #[tokio::test]
    async fn invalid_store_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (store_path, state) = setup(&dir);

        let handle = watch_store(store_path.clone(), state.clone()).expect("watch");
        let mut rx = handle.subscribe();

        fs::write(&store_path, sample_store(&["dup", "dup"])).expect("rewrite store");

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timeout waiting for reload")
            .expect("channel closed");
        assert!(matches!(event, ReloadEvent::Failed(_)));
        assert_eq!(state.lock().await.snapshot().macros[0].name, "first");
        handle.join_handle.abort();
    }
}
