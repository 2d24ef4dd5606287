//! Local TCP listener accepting the recognition worker's line-delimited event stream.

pub mod framing;

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use framing::{
    decode_record, parse_stdout_line, EventSource, FrameDecoder, GestureEvent, IngestError,
    LineFramer,
};

const READ_BUFFER_SIZE: usize = 4096;

pub type GestureSender = mpsc::UnboundedSender<GestureEvent>;

pub struct IngestServer {
    local_addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    shutdown_tx: watch::Sender<bool>,
    join_handle: JoinHandle<()>,
}

impl IngestServer {
    pub async fn bind(addr: SocketAddr, events: GestureSender) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let connections = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(%local_addr, "ingest listener bound");
        let join_handle = tokio::spawn(accept_loop(
            listener,
            events,
            connections.clone(),
            shutdown_rx,
        ));

        Ok(Self {
            local_addr,
            connections,
            shutdown_tx,
            join_handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live count of open worker connections.
    pub fn connection_counter(&self) -> Arc<AtomicUsize> {
        self.connections.clone()
    }

    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Closes the listener and every open connection, then waits for the port
    /// to be released.
    pub async fn shutdown(self) {
        let open = self.active_connections();
        if open > 0 {
            debug!(open, "closing open worker connections");
        }
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.join_handle.await {
            warn!(error = %err, "ingest accept loop ended abnormally");
        }
        info!(local_addr = %self.local_addr, "ingest listener closed");
    }
}

async fn accept_loop(
    listener: TcpListener,
    events: GestureSender,
    connections: Arc<AtomicUsize>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut next_id: u64 = 0;
    let mut handlers: Vec<JoinHandle<()>> = Vec::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    next_id += 1;
                    let active = connections.fetch_add(1, Ordering::SeqCst) + 1;
                    if active > 1 {
                        warn!(connection = next_id, %peer, active, "additional worker connection accepted");
                    } else {
                        info!(connection = next_id, %peer, "worker connected");
                    }
                    handlers.retain(|handle| !handle.is_finished());
                    handlers.push(tokio::spawn(handle_connection(
                        next_id,
                        stream,
                        peer,
                        events.clone(),
                        connections.clone(),
                        shutdown_rx.clone(),
                    )));
                }
                Err(err) => warn!(error = %err, "failed to accept worker connection"),
            }
        }
    }

    drop(listener);
    futures::future::join_all(handlers).await;
}

async fn handle_connection(
    id: u64,
    mut stream: TcpStream,
    peer: SocketAddr,
    events: GestureSender,
    connections: Arc<AtomicUsize>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!(connection = id, "closing connection for shutdown");
                break;
            }
            read = stream.read(&mut buf) => match read {
                Ok(0) => {
                    info!(connection = id, %peer, "worker connection closed");
                    break;
                }
                Ok(n) => {
                    // Events from one read are forwarded in delimiter order
                    // before the next read is serviced.
                    for event in decoder.feed(&buf[..n]) {
                        debug!(connection = id, gesture = %event.gesture_id, "gesture event");
                        if events.send(event).is_err() {
                            warn!(connection = id, "event consumer gone; dropping connection");
                            connections.fetch_sub(1, Ordering::SeqCst);
                            return;
                        }
                    }
                }
                Err(err) => {
                    warn!(connection = id, %peer, error = %err, "worker connection error");
                    break;
                }
            }
        }
    }

    if decoder.pending_len() > 0 {
        debug!(
            connection = id,
            bytes = decoder.pending_len(),
            "discarding unterminated fragment"
        );
    }
    connections.fetch_sub(1, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    async fn server() -> (IngestServer, mpsc::UnboundedReceiver<GestureEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let server = IngestServer::bind("127.0.0.1:0".parse().expect("addr"), tx)
            .await
            .expect("bind");
        (server, rx)
    }

    async fn next_id(rx: &mut mpsc::UnboundedReceiver<GestureEvent>) -> String {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timeout waiting for event")
            .expect("channel closed")
            .gesture_id
    }

    #[tokio::test]
    async fn split_writes_produce_one_event() {
        let (server, mut rx) = server().await;
        let mut client = TcpStream::connect(server.local_addr()).await.expect("connect");
        client.write_all(b"{\"gesture\":").await.expect("write");
        client.flush().await.expect("flush");
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.write_all(b"\"fist\"}\n").await.expect("write");

        assert_eq!(next_id(&mut rx).await, "fist");
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );
        server.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_line_keeps_connection_open() {
        let (server, mut rx) = server().await;
        let mut client = TcpStream::connect(server.local_addr()).await.expect("connect");
        client
            .write_all(b"bad\n{\"gesture\":\"open_hand\"}\n")
            .await
            .expect("write");
        assert_eq!(next_id(&mut rx).await, "open_hand");

        client.write_all(b"{\"gesture\":\"peace\"}\n").await.expect("write");
        assert_eq!(next_id(&mut rx).await, "peace");
        server.shutdown().await;
    }

    #[tokio::test]
    async fn keeps_listening_after_a_connection_closes() {
        let (server, mut rx) = server().await;
        {
            let mut first = TcpStream::connect(server.local_addr()).await.expect("connect");
            first.write_all(b"{\"gesture\":\"fist\"}\n").await.expect("write");
            assert_eq!(next_id(&mut rx).await, "fist");
        }
        let mut second = TcpStream::connect(server.local_addr()).await.expect("reconnect");
        second
            .write_all(b"{\"gesture\":\"thumbs_up\"}\n")
            .await
            .expect("write");
        assert_eq!(next_id(&mut rx).await, "thumbs_up");
        server.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_releases_the_port() {
        let (server, _rx) = server().await;
        let addr = server.local_addr();
        let _client = TcpStream::connect(addr).await.expect("connect");
        for _ in 0..50 {
            if server.active_connections() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.active_connections(), 1);
        server.shutdown().await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let rebound = IngestServer::bind(addr, tx).await.expect("rebind");
        rebound.shutdown().await;
    }
}
