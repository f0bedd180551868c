//! Single-port connection multiplexer.
//!
//! The [`Multiplexer`] owns the listening socket. Each accepted connection is
//! sniffed in its own task until [`classify`] can tell which protocol the
//! client speaks, then handed to the [`MuxListener`] registered for that
//! protocol. Sub-listeners are consumed by independent servers that run their
//! own accept loops concurrently on the same port.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::Stream;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

mod classify;
mod stream;

pub use classify::{classify, Protocol, HTTP2_PREFACE};
pub use stream::MuxStream;

/// Connections buffered per sub-listener before dispatch waits.
const LISTENER_BACKLOG: usize = 128;

/// Multiplexer errors.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// The multiplexer stopped; no more connections will arrive.
    #[error("listener closed")]
    ListenerClosed,

    /// Accepting on the root socket failed.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
}

/// Connection classification settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxSettings {
    /// Time a client has to send enough bytes to be classified.
    pub sniff_timeout_ms: u64,
    /// Bytes read at most while classifying.
    pub max_prefix_len: usize,
}

impl MuxSettings {
    /// The sniff timeout as a duration.
    pub fn sniff_timeout(&self) -> Duration {
        Duration::from_millis(self.sniff_timeout_ms)
    }
}

impl Default for MuxSettings {
    fn default() -> Self {
        Self {
            sniff_timeout_ms: 5_000,
            max_prefix_len: 64,
        }
    }
}

/// Owns the listening socket and dispatches classified connections.
pub struct Multiplexer {
    listener: TcpListener,
    settings: MuxSettings,
    routes: HashMap<Protocol, mpsc::Sender<MuxStream>>,
}

impl Multiplexer {
    /// Creates a multiplexer over an already bound socket.
    pub fn new(listener: TcpListener, settings: MuxSettings) -> Self {
        Self {
            listener,
            settings,
            routes: HashMap::new(),
        }
    }

    /// Address of the root socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Registers the sub-listener receiving connections of `protocol`.
    ///
    /// Registering the same protocol again replaces the previous sub-listener,
    /// which then reports [`MuxError::ListenerClosed`].
    pub fn listener(&mut self, protocol: Protocol) -> MuxListener {
        let (tx, rx) = mpsc::channel(LISTENER_BACKLOG);
        self.routes.insert(protocol, tx);
        MuxListener { protocol, rx }
    }

    /// Runs the root accept loop until `shutdown` completes.
    ///
    /// Returning closes every sub-listener once in-flight classifications
    /// finish. An accept error is returned as fatal.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), MuxError>
    where
        F: Future<Output = ()>,
    {
        let Self {
            listener,
            settings,
            routes,
        } = self;
        let routes = Arc::new(routes);

        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "multiplexer listening");
        }

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("multiplexer stopping");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (socket, peer) = accepted.map_err(MuxError::Accept)?;
                    let settings = settings.clone();
                    let routes = Arc::clone(&routes);
                    tokio::spawn(async move {
                        dispatch(socket, peer, &settings, &routes).await;
                    });
                }
            }
        }
    }
}

async fn dispatch(
    mut socket: TcpStream,
    peer: SocketAddr,
    settings: &MuxSettings,
    routes: &HashMap<Protocol, mpsc::Sender<MuxStream>>,
) {
    let sniffed = tokio::time::timeout(
        settings.sniff_timeout(),
        sniff(&mut socket, settings.max_prefix_len),
    )
    .await;

    let (protocol, prefix) = match sniffed {
        Ok(Ok(sniffed)) => sniffed,
        Ok(Err(e)) => {
            debug!(%peer, error = %e, "connection closed before classification");
            return;
        }
        Err(_) => {
            debug!(%peer, "classification timed out");
            return;
        }
    };

    counter!("tracker.mux.connections", "protocol" => protocol.as_str()).increment(1);

    let Some(route) = routes.get(&protocol) else {
        debug!(%peer, %protocol, "no listener for protocol, dropping connection");
        return;
    };

    debug!(%peer, %protocol, "connection classified");
    if route
        .send(MuxStream::new(prefix.freeze(), socket))
        .await
        .is_err()
    {
        warn!(%peer, %protocol, "listener gone, dropping connection");
    }
}

/// Reads from `socket` until the protocol is known.
async fn sniff(socket: &mut TcpStream, max_len: usize) -> io::Result<(Protocol, BytesMut)> {
    let mut buf = BytesMut::with_capacity(max_len);

    loop {
        if let Some(protocol) = classify(&buf) {
            return Ok((protocol, buf));
        }
        if buf.len() >= max_len {
            return Ok((Protocol::Unknown, buf));
        }
        if socket.read_buf(&mut buf).await? == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
    }
}

/// Receives the connections classified as one protocol.
#[derive(Debug)]
pub struct MuxListener {
    protocol: Protocol,
    rx: mpsc::Receiver<MuxStream>,
}

impl MuxListener {
    /// Protocol this listener receives.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Waits for the next connection.
    ///
    /// Yields [`MuxError::ListenerClosed`] once the multiplexer has stopped.
    pub async fn accept(&mut self) -> Result<MuxStream, MuxError> {
        self.rx.recv().await.ok_or(MuxError::ListenerClosed)
    }

    /// Adapts the listener to a stream of connections ending at close.
    pub fn into_incoming(self) -> impl Stream<Item = Result<MuxStream, MuxError>> {
        futures_util::stream::unfold(self, |mut listener| async move {
            match listener.accept().await {
                Ok(stream) => Some((Ok(stream), listener)),
                Err(MuxError::ListenerClosed) => None,
                Err(e) => Some((Err(e), listener)),
            }
        })
    }
}
