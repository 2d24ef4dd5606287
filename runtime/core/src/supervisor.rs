//! Life-cycle of the recognition worker process and the ingest listener.
//!
//! `Idle -> Starting -> Running -> Stopping -> Idle`, plus `Running -> Idle`
//! when the worker exits on its own. The state is the only mutable piece
//! shared between callers; a `start` or `stop` issued mid-transition is
//! rejected, never queued.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::{publish, StatusEvent, StatusSender};
use crate::ingest::{parse_stdout_line, EventSource, GestureEvent, GestureSender, IngestServer};

pub const DEFAULT_BIND_RETRY_BACKOFF: Duration = Duration::from_millis(250);
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for DetectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DetectionState::Idle => "idle",
            DetectionState::Starting => "starting",
            DetectionState::Running => "running",
            DetectionState::Stopping => "stopping",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("detection is already {0}")]
    AlreadyActive(DetectionState),
    #[error("ingest listener unavailable on {addr}: {reason}")]
    ListenerUnavailable { addr: SocketAddr, reason: String },
    #[error("failed to spawn worker `{program}`: {reason}")]
    WorkerSpawnFailed { program: String, reason: String },
    #[error("start aborted by a concurrent stop")]
    StartAborted,
    #[error("supervisor is busy ({0})")]
    Busy(DetectionState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub ingest_addr: SocketAddr,
    pub worker: WorkerConfig,
    pub bind_retry_backoff: Duration,
    pub termination_grace: Duration,
}

impl SupervisorConfig {
    pub fn new(ingest_addr: SocketAddr, worker: WorkerConfig) -> Self {
        Self {
            ingest_addr,
            worker,
            bind_retry_backoff: DEFAULT_BIND_RETRY_BACKOFF,
            termination_grace: DEFAULT_TERMINATION_GRACE,
        }
    }
}

struct WorkerHandle {
    stop_tx: oneshot::Sender<()>,
    monitor: JoinHandle<()>,
}

struct Inner {
    state: DetectionState,
    generation: u64,
    server: Option<IngestServer>,
    worker: Option<WorkerHandle>,
}

struct Shared {
    config: SupervisorConfig,
    inner: Mutex<Inner>,
    events: GestureSender,
    status: StatusSender,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn detection_changed(&self, detecting: bool, error: Option<String>) {
        publish(&self.status, StatusEvent::DetectionChanged { detecting, error });
    }

    /// Returns to `Idle` after a failed start, if nothing else moved the
    /// state in the meantime.
    fn abandon_start(&self, generation: u64, reason: &SupervisorError) {
        {
            let mut inner = self.lock();
            if inner.generation == generation {
                inner.state = DetectionState::Idle;
            }
        }
        error!(error = %reason, "detection failed to start");
        self.detection_changed(false, Some(reason.to_string()));
    }

    async fn handle_worker_exit(&self, generation: u64, status: io::Result<ExitStatus>) {
        let server = {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state != DetectionState::Running {
                return;
            }
            inner.state = DetectionState::Idle;
            inner.worker = None;
            inner.server.take()
        };

        let error = match status {
            Ok(status) if status.success() => {
                info!(%status, "worker exited");
                None
            }
            Ok(status) => {
                warn!(%status, "worker exited unexpectedly");
                Some(format!("worker exited unexpectedly ({status})"))
            }
            Err(err) => {
                warn!(error = %err, "lost track of worker process");
                Some(format!("lost track of worker process: {err}"))
            }
        };

        if let Some(server) = server {
            server.shutdown().await;
        }
        self.detection_changed(false, error);
    }
}

/// Owns the worker process and the ingest listener. Cloning yields another
/// handle to the same supervisor.
#[derive(Clone)]
pub struct WorkerSupervisor {
    shared: Arc<Shared>,
}

impl WorkerSupervisor {
    pub fn new(config: SupervisorConfig, events: GestureSender, status: StatusSender) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                inner: Mutex::new(Inner {
                    state: DetectionState::Idle,
                    generation: 0,
                    server: None,
                    worker: None,
                }),
                events,
                status,
            }),
        }
    }

    pub fn status(&self) -> DetectionState {
        self.shared.lock().state
    }

    /// Address the ingest listener is bound to while detection runs.
    pub fn ingest_addr(&self) -> Option<SocketAddr> {
        self.shared.lock().server.as_ref().map(IngestServer::local_addr)
    }

    pub async fn start(&self) -> Result<(), SupervisorError> {
        let shared = &self.shared;
        let generation = {
            let mut inner = shared.lock();
            if inner.state != DetectionState::Idle {
                return Err(SupervisorError::AlreadyActive(inner.state));
            }
            inner.state = DetectionState::Starting;
            inner.generation += 1;
            inner.generation
        };
        info!(generation, "starting detection");

        let server = match self.bind_listener().await {
            Ok(server) => server,
            Err(err) => {
                shared.abandon_start(generation, &err);
                return Err(err);
            }
        };

        let mut child = match spawn_worker(&shared.config.worker) {
            Ok(child) => child,
            Err(err) => {
                server.shutdown().await;
                shared.abandon_start(generation, &err);
                return Err(err);
            }
        };
        info!(
            program = %shared.config.worker.program,
            pid = child.id().unwrap_or_default(),
            "worker spawned"
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(relay_stdout(
                stdout,
                shared.events.clone(),
                server.connection_counter(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr));
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let aborted = {
            let mut inner = shared.lock();
            if inner.generation == generation && inner.state == DetectionState::Starting {
                inner.state = DetectionState::Running;
                let monitor = tokio::spawn(monitor_worker(
                    shared.clone(),
                    generation,
                    child,
                    stop_rx,
                ));
                inner.server = Some(server);
                inner.worker = Some(WorkerHandle { stop_tx, monitor });
                None
            } else {
                Some((child, server))
            }
        };

        match aborted {
            None => {
                info!("detection running");
                shared.detection_changed(true, None);
                Ok(())
            }
            Some((mut child, server)) => {
                info!("stop requested while starting; tearing down");
                terminate(&mut child, shared.config.termination_grace).await;
                server.shutdown().await;
                {
                    let mut inner = shared.lock();
                    if inner.generation == generation {
                        inner.state = DetectionState::Idle;
                    }
                }
                shared.detection_changed(false, None);
                Err(SupervisorError::StartAborted)
            }
        }
    }

    /// Stopping while idle is a successful no-op. Stopping while starting
    /// hands the teardown to the in-flight `start`, which then reports
    /// `StartAborted`.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let shared = &self.shared;
        let (server, worker) = {
            let mut inner = shared.lock();
            match inner.state {
                DetectionState::Idle => return Ok(()),
                DetectionState::Stopping => {
                    return Err(SupervisorError::Busy(DetectionState::Stopping))
                }
                DetectionState::Starting => {
                    inner.state = DetectionState::Stopping;
                    return Ok(());
                }
                DetectionState::Running => {
                    inner.state = DetectionState::Stopping;
                    (inner.server.take(), inner.worker.take())
                }
            }
        };
        info!("stopping detection");

        if let Some(worker) = worker {
            let _ = worker.stop_tx.send(());
            if let Err(err) = worker.monitor.await {
                warn!(error = %err, "worker monitor ended abnormally");
            }
        }
        if let Some(server) = server {
            server.shutdown().await;
        }

        shared.lock().state = DetectionState::Idle;
        shared.detection_changed(false, None);
        info!("detection stopped");
        Ok(())
    }

    async fn bind_listener(&self) -> Result<IngestServer, SupervisorError> {
        let shared = &self.shared;
        let addr = shared.config.ingest_addr;
        let unavailable = |err: io::Error| SupervisorError::ListenerUnavailable {
            addr,
            reason: err.to_string(),
        };

        match IngestServer::bind(addr, shared.events.clone()).await {
            Ok(server) => return Ok(server),
            Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
                warn!(%addr, "ingest port in use; retrying once");
            }
            Err(err) => return Err(unavailable(err)),
        }

        // Held by another process: our own listeners are closed before `Idle`.
        tokio::time::sleep(shared.config.bind_retry_backoff).await;

        IngestServer::bind(addr, shared.events.clone())
            .await
            .map_err(unavailable)
    }
}

fn spawn_worker(worker: &WorkerConfig) -> Result<Child, SupervisorError> {
    Command::new(&worker.program)
        .args(&worker.args)
        .current_dir(&worker.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| SupervisorError::WorkerSpawnFailed {
            program: worker.program.clone(),
            reason: err.to_string(),
        })
}

async fn monitor_worker(
    shared: Arc<Shared>,
    generation: u64,
    mut child: Child,
    stop_rx: oneshot::Receiver<()>,
) {
    tokio::select! {
        status = child.wait() => shared.handle_worker_exit(generation, status).await,
        _ = stop_rx => terminate(&mut child, shared.config.termination_grace).await,
    }
}

/// Asks the worker to exit, then kills it once the grace period runs out.
/// Failures are logged and swallowed so the caller can always reach `Idle`.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: plain signal delivery to a child we spawned and still own.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc == 0 {
                match tokio::time::timeout(grace, child.wait()).await {
                    Ok(Ok(status)) => {
                        info!(%status, "worker terminated");
                        return;
                    }
                    Ok(Err(err)) => warn!(error = %err, "failed waiting for worker"),
                    Err(_) => warn!(?grace, "worker ignored SIGTERM; killing"),
                }
            } else {
                warn!(error = %io::Error::last_os_error(), "failed to signal worker");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    match child.kill().await {
        Ok(()) => info!("worker killed"),
        Err(err) => warn!(error = %err, "failed to kill worker"),
    }
}

/// Forwards `[GESTURE] <id>` lines while no socket connection is open; the
/// socket is the primary channel once connected.
async fn relay_stdout(
    stdout: impl AsyncRead + Unpin,
    events: GestureSender,
    connections: Arc<AtomicUsize>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_stdout_line(&line) {
                Some(gesture_id) if connections.load(Ordering::SeqCst) == 0 => {
                    debug!(gesture = %gesture_id, "gesture from worker stdout");
                    if events
                        .send(GestureEvent::new(gesture_id, EventSource::Stdout))
                        .is_err()
                    {
                        break;
                    }
                }
                Some(_) => {}
                None => debug!(target: "worker", "{line}"),
            },
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "worker stdout closed");
                break;
            }
        }
    }
}

async fn log_stderr(stderr: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "worker", "{line}");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::events::status_channel;
    use tokio::sync::{broadcast, mpsc};

    fn config(program: &str, args: &[&str], dir: &tempfile::TempDir) -> SupervisorConfig {
        let mut config = SupervisorConfig::new(
            "127.0.0.1:0".parse().expect("addr"),
            WorkerConfig {
                program: program.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
                working_dir: dir.path().to_path_buf(),
            },
        );
        config.bind_retry_backoff = Duration::from_millis(10);
        config.termination_grace = Duration::from_millis(500);
        config
    }

    fn supervisor(
        config: SupervisorConfig,
    ) -> (
        WorkerSupervisor,
        mpsc::UnboundedReceiver<GestureEvent>,
        broadcast::Receiver<StatusEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = status_channel();
        let status_rx = status.subscribe();
        (WorkerSupervisor::new(config, tx, status), rx, status_rx)
    }

    async fn next_detection_change(rx: &mut broadcast::Receiver<StatusEvent>) -> (bool, Option<String>) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for status")
                .expect("status channel closed");
            if let StatusEvent::DetectionChanged { detecting, error } = event {
                return (detecting, error);
            }
        }
    }

    #[tokio::test]
    async fn start_and_stop_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (supervisor, _events, mut status) = supervisor(config("sleep", &["30"], &dir));

        supervisor.start().await.expect("start");
        assert_eq!(supervisor.status(), DetectionState::Running);
        let addr = supervisor.ingest_addr().expect("bound");
        assert_eq!(next_detection_change(&mut status).await, (true, None));

        supervisor.stop().await.expect("stop");
        assert_eq!(supervisor.status(), DetectionState::Idle);
        assert!(supervisor.ingest_addr().is_none());
        assert_eq!(next_detection_change(&mut status).await, (false, None));
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (supervisor, _events, _status) = supervisor(config("sleep", &["30"], &dir));

        let (first, second) = tokio::join!(supervisor.start(), supervisor.start());
        assert!(first.is_ok());
        assert!(matches!(second, Err(SupervisorError::AlreadyActive(_))));
        supervisor.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn stop_while_idle_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (supervisor, _events, mut status) = supervisor(config("sleep", &["30"], &dir));
        supervisor.stop().await.expect("stop");
        assert_eq!(supervisor.status(), DetectionState::Idle);
        assert!(status.try_recv().is_err());
    }

    #[tokio::test]
    async fn unexpected_worker_exit_returns_to_idle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (supervisor, _events, mut status) =
            supervisor(config("sh", &["-c", "sleep 0.2; exit 3"], &dir));

        supervisor.start().await.expect("start");
        assert_eq!(next_detection_change(&mut status).await, (true, None));
        let (detecting, error) = next_detection_change(&mut status).await;
        assert!(!detecting);
        assert!(error.is_some());
        assert_eq!(supervisor.status(), DetectionState::Idle);
        assert!(supervisor.ingest_addr().is_none());

        // A fresh start is accepted after the forced transition.
        supervisor.start().await.expect("restart");
        supervisor.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn spawn_failure_reports_and_stays_idle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (supervisor, _events, mut status) =
            supervisor(config("/nonexistent/gesture-worker", &[], &dir));

        let err = supervisor.start().await.expect_err("spawn should fail");
        assert!(matches!(err, SupervisorError::WorkerSpawnFailed { .. }));
        assert_eq!(supervisor.status(), DetectionState::Idle);
        assert!(supervisor.ingest_addr().is_none());
        let (detecting, error) = next_detection_change(&mut status).await;
        assert!(!detecting && error.is_some());
    }

    #[tokio::test]
    async fn occupied_port_yields_listener_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let squatter = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let mut config = config("sleep", &["30"], &dir);
        config.ingest_addr = squatter.local_addr().expect("addr");
        let (supervisor, _events, _status) = supervisor(config);

        let err = supervisor.start().await.expect_err("bind should fail");
        assert!(matches!(err, SupervisorError::ListenerUnavailable { .. }));
        assert_eq!(supervisor.status(), DetectionState::Idle);
    }

    #[tokio::test]
    async fn bind_retry_succeeds_once_the_port_frees_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let squatter = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let mut config = config("sleep", &["30"], &dir);
        config.ingest_addr = squatter.local_addr().expect("addr");
        config.bind_retry_backoff = Duration::from_millis(300);
        let (supervisor, _events, _status) = supervisor(config.clone());

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(squatter);
        });

        supervisor.start().await.expect("retry should bind");
        release.await.expect("release task");
        assert_eq!(supervisor.status(), DetectionState::Running);
        assert_eq!(supervisor.ingest_addr(), Some(config.ingest_addr));
        supervisor.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn stdout_gestures_are_relayed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (supervisor, mut events, _status) = supervisor(config(
            "sh",
            &["-c", "echo 'loading model'; echo '[GESTURE] fist'; sleep 30"],
            &dir,
        ));

        supervisor.start().await.expect("start");
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(event.gesture_id, "fist");
        assert_eq!(event.source, EventSource::Stdout);
        supervisor.stop().await.expect("stop");
    }
}
