//! TCP stream server: accept loop, handshake, concurrent request dispatch.

use crate::error::ServerError;
use bytes::{Bytes, BytesMut};
use muxrpc_protocol::{
    read_options, CodecKind, FrameReader, FrameWriter, Header, MAGIC_NUMBER,
};
use muxrpc_registry::{MethodEntry, Registry};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9999".parse().unwrap(),
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// Stream server for muxrpc.
pub struct Server {
    config: ServerConfig,
    registry: Arc<Registry>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

/// All writes on one connection funnel through this send mutex.
type SharedWriter = Arc<Mutex<FrameWriter<OwnedWriteHalf>>>;

impl Server {
    /// Creates a new server over a quiescent registry.
    pub fn new(config: ServerConfig, registry: Arc<Registry>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            registry,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accepts connections until shutdown or an accept error; each connection
    /// runs its own task. An accept error terminates the loop; callers may
    /// restart.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let registry = self.registry.clone();
                            let stats = self.stats.clone();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    handle_connection(stream, addr, registry, stats.clone()).await
                                {
                                    tracing::debug!("connection {} error: {}", addr, e);
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }
                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!("client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {}", e);
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// A receiver that fires when shutdown is initiated.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

/// Per-connection state machine: handshake, then a decode → dispatch loop
/// until the client goes away.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<Registry>,
    stats: Arc<ServerStats>,
) -> Result<(), ServerError> {
    tracing::info!("client connected: {}", addr);
    stream.set_nodelay(true).ok();
    let (mut read_half, write_half) = stream.into_split();

    // Handshake: one JSON-encoded options value on the raw stream. Any
    // rejection drops the connection without a reply, since no codec has
    // been chosen yet.
    let mut buf = BytesMut::with_capacity(8 * 1024);
    let options = match read_options(&mut read_half, &mut buf).await {
        Ok(options) => options,
        Err(e) => {
            tracing::debug!("[{}] handshake decode failed: {}", addr, e);
            return Ok(());
        }
    };
    if options.magic_number != MAGIC_NUMBER {
        tracing::debug!("[{}] invalid magic number {:#x}", addr, options.magic_number);
        return Ok(());
    }
    let kind = match CodecKind::from_name(&options.codec_type) {
        Some(kind) => kind,
        None => {
            tracing::debug!("[{}] unknown codec type {}", addr, options.codec_type);
            return Ok(());
        }
    };
    tracing::debug!("[{}] using codec {}", addr, kind.name());

    // Bytes that arrived behind the handshake already belong to the codec.
    let mut reader = FrameReader::with_buffer(read_half, kind, buf);
    let writer: SharedWriter = Arc::new(Mutex::new(FrameWriter::new(write_half, kind)));
    let handle_timeout = options.handle_timeout;
    let mut handlers = JoinSet::new();

    loop {
        let header = match reader.read_header().await {
            Ok(Some(header)) => header,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("[{}] read header error: {}", addr, e);
                break;
            }
        };
        // The body is read unconditionally so the stream stays positioned at
        // the next header even when resolution fails.
        let body = match reader.read_body().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!("[{}] read body error: {}", addr, e);
                break;
            }
        };

        stats.requests_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("[{}] request {} (seq={})", addr, header.service_method, header.seq);

        let entry = match registry.resolve(&header.service_method) {
            Ok((_, entry)) => entry,
            Err(e) => {
                let mut response = header;
                response.error = e.to_string();
                write_response(&writer, &response, kind.empty_body()).await;
                continue;
            }
        };

        let writer = writer.clone();
        handlers.spawn(async move {
            handle_request(writer, kind, header, entry, body, handle_timeout).await;
        });
    }

    // Let in-flight handlers finish their responses before closing.
    while handlers.join_next().await.is_some() {}
    let _ = writer.lock().await.shutdown().await;
    Ok(())
}

/// Runs one invocation and writes its response. With a non-zero
/// `handle_timeout` the invocation-to-response window is bounded: on expiry a
/// timeout error response is written and the still-running invocation is
/// disowned, its late result discarded with the join handle.
async fn handle_request(
    writer: SharedWriter,
    kind: CodecKind,
    header: Header,
    entry: Arc<MethodEntry>,
    body: Bytes,
    handle_timeout: Duration,
) {
    let invoke = tokio::task::spawn_blocking(move || entry.call(kind, &body));

    let joined = if handle_timeout.is_zero() {
        Some(invoke.await)
    } else {
        match tokio::time::timeout(handle_timeout, invoke).await {
            Ok(joined) => Some(joined),
            Err(_) => None,
        }
    };

    let mut response = header;
    let body = match joined {
        None => {
            response.error = format!(
                "request handle timeout: expect within {:?}",
                handle_timeout
            );
            kind.empty_body()
        }
        Some(Ok(Ok(reply))) => reply,
        Some(Ok(Err(e))) => {
            response.error = e.to_string();
            kind.empty_body()
        }
        Some(Err(e)) => {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
            response.error = e.to_string();
            kind.empty_body()
        }
    };
    write_response(&writer, &response, body).await;
}

async fn write_response(writer: &SharedWriter, header: &Header, body: Vec<u8>) {
    let mut writer = writer.lock().await;
    if let Err(e) = writer.write(header, &body).await {
        tracing::debug!("write response error: {}", e);
    }
}
