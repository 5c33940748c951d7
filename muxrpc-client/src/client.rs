//! Stream client: dial, handshake, and multiplexed calls.

use crate::error::ClientError;
use bytes::Bytes;
use muxrpc_protocol::{
    CodecKind, ConnectOptions, FrameReader, FrameWriter, Header, WireErrorKind,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

/// Terminal outcome of one call, delivered on its completion channel. Kept
/// cloneable so one reader failure can complete every pending call.
#[derive(Debug, Clone)]
enum CallError {
    Shutdown,
    Remote(String),
    Connection(String),
}

impl CallError {
    fn into_client_error(self) -> ClientError {
        match self {
            CallError::Shutdown => ClientError::Shutdown,
            CallError::Remote(message) => ClientError::Remote {
                kind: WireErrorKind::classify(&message),
                message,
            },
            CallError::Connection(message) => ClientError::Connection(message),
        }
    }
}

type CallOutcome = Result<Bytes, CallError>;

/// Mutable client state, guarded by the state mutex. Sequence assignment and
/// pending-map insertion happen in one critical section.
#[derive(Debug)]
struct ClientState {
    seq: u64,
    pending: HashMap<u64, oneshot::Sender<CallOutcome>>,
    closing: bool,
    shutdown: bool,
}

#[derive(Debug)]
struct Inner {
    kind: CodecKind,
    /// Bound applied by [`Client::call`]; zero disables it.
    call_timeout: Duration,
    /// Send mutex: serialises every outbound message on the connection.
    writer: tokio::sync::Mutex<FrameWriter<OwnedWriteHalf>>,
    /// State mutex: never held across an await point.
    state: Mutex<ClientState>,
}

/// Handle to one in-flight call issued with [`Client::go`]. Await
/// [`Call::recv`] for the reply. Dropping the handle cancels the call: its
/// pending entry is removed immediately, and any late server reply is
/// drained by the background reader.
pub struct Call {
    seq: u64,
    kind: CodecKind,
    done: oneshot::Receiver<CallOutcome>,
    inner: Arc<Inner>,
}

impl Call {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Waits for the reply and decodes it into `R`.
    pub async fn recv<R: DeserializeOwned>(mut self) -> Result<R, ClientError> {
        match (&mut self.done).await {
            Ok(Ok(body)) => self
                .kind
                .decode(&body)
                .map_err(|e| ClientError::ReadBody(e.to_string())),
            Ok(Err(e)) => Err(e.into_client_error()),
            Err(_) => Err(ClientError::Cancelled),
        }
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        // Check-and-remove: after a delivered reply the entry is already
        // gone, and sequence numbers are never reused, so this can only
        // retire this call's own registration.
        self.inner.state.lock().pending.remove(&self.seq);
    }
}

/// A multiplexing RPC client over one TCP connection. Cheap to clone; all
/// clones share the connection and its pending-call table.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Dials with default options (binary codec, 10 s connect timeout).
    pub async fn dial(addr: &str) -> Result<Self, ClientError> {
        Self::dial_with_options(addr, ConnectOptions::default()).await
    }

    /// Dials `addr`, sends the handshake, and spawns the background reader.
    /// The whole connect stage is bounded by `options.connect_timeout`; on
    /// expiry the in-flight dial is abandoned and [`ClientError::ConnectTimeout`]
    /// is returned. A zero timeout disables the bound.
    pub async fn dial_with_options(
        addr: &str,
        options: ConnectOptions,
    ) -> Result<Self, ClientError> {
        let kind = CodecKind::from_name(&options.codec_type)
            .ok_or_else(|| ClientError::UnknownCodec(options.codec_type.clone()))?;

        let connect = Self::connect(addr, &options, kind);
        let (reader, writer) = if options.connect_timeout.is_zero() {
            connect.await?
        } else {
            tokio::time::timeout(options.connect_timeout, connect)
                .await
                .map_err(|_| ClientError::ConnectTimeout)??
        };

        let inner = Arc::new(Inner {
            kind,
            call_timeout: options.call_timeout,
            writer: tokio::sync::Mutex::new(writer),
            state: Mutex::new(ClientState {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
        });

        let reader_inner = inner.clone();
        tokio::spawn(async move { reader_inner.read_loop(reader).await });

        Ok(Client { inner })
    }

    async fn connect(
        addr: &str,
        options: &ConnectOptions,
        kind: CodecKind,
    ) -> Result<(FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>), ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();
        let mut writer = FrameWriter::new(write_half, kind);
        writer.write_options(options).await?;
        Ok((FrameReader::new(read_half, kind), writer))
    }

    /// Issues a call asynchronously and returns its [`Call`] handle.
    pub async fn go<A: Serialize>(
        &self,
        service_method: &str,
        args: &A,
    ) -> Result<Call, ClientError> {
        let body = self.inner.kind.encode(args)?;

        let (tx, rx) = oneshot::channel();
        let seq = {
            let mut state = self.inner.state.lock();
            if state.closing || state.shutdown {
                return Err(ClientError::Shutdown);
            }
            let seq = state.seq;
            state.seq += 1;
            state.pending.insert(seq, tx);
            seq
        };

        let header = Header::request(service_method, seq);
        let mut writer = self.inner.writer.lock().await;
        if let Err(e) = writer.write(&header, &body).await {
            // The reader must never see this call again.
            self.inner.state.lock().pending.remove(&seq);
            return Err(e.into());
        }
        drop(writer);

        tracing::debug!("sent request {} (seq={})", service_method, seq);
        Ok(Call {
            seq,
            kind: self.inner.kind,
            done: rx,
            inner: self.inner.clone(),
        })
    }

    /// Issues a call and waits for the reply, bounded by the call timeout
    /// carried on the dial options.
    pub async fn call<A: Serialize, R: DeserializeOwned>(
        &self,
        service_method: &str,
        args: &A,
    ) -> Result<R, ClientError> {
        self.call_with_timeout(service_method, args, self.inner.call_timeout)
            .await
    }

    /// Issues a call and waits for the reply, bounded by `timeout` (zero
    /// disables the bound). On expiry the dropped [`Call`] handle retires
    /// the pending entry, so a late server reply is drained harmlessly.
    pub async fn call_with_timeout<A: Serialize, R: DeserializeOwned>(
        &self,
        service_method: &str,
        args: &A,
        timeout: Duration,
    ) -> Result<R, ClientError> {
        let call = self.go(service_method, args).await?;
        if timeout.is_zero() {
            return call.recv().await;
        }
        match tokio::time::timeout(timeout, call.recv::<R>()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Number of calls awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Whether the client still accepts calls.
    pub fn is_available(&self) -> bool {
        let state = self.inner.state.lock();
        !state.closing && !state.shutdown
    }

    /// Closes the client. In-flight calls are not terminated synchronously;
    /// the background reader completes them once the connection winds down.
    /// A second close returns [`ClientError::Shutdown`].
    pub async fn close(&self) -> Result<(), ClientError> {
        {
            let mut state = self.inner.state.lock();
            if state.closing {
                return Err(ClientError::Shutdown);
            }
            state.closing = true;
        }
        let mut writer = self.inner.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

impl Inner {
    /// Background reader: matches responses to pending calls by sequence
    /// number. Runs until the connection fails or closes, then completes
    /// every remaining pending call.
    async fn read_loop(self: Arc<Self>, mut reader: FrameReader<OwnedReadHalf>) {
        let err = loop {
            let header = match reader.read_header().await {
                Ok(Some(header)) => header,
                Ok(None) => {
                    tracing::debug!("connection closed by peer");
                    break CallError::Shutdown;
                }
                Err(e) => {
                    tracing::debug!("read header failed: {}", e);
                    break CallError::Connection(e.to_string());
                }
            };
            // The body is consumed even when nobody wants it, to keep the
            // stream positioned at the next header.
            let body = match reader.read_body().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::debug!("read body failed: {}", e);
                    break CallError::Connection(e.to_string());
                }
            };

            let pending = self.state.lock().pending.remove(&header.seq);
            match pending {
                // Cancelled or never fully sent; drop the body.
                None => tracing::debug!("no pending call for seq={}", header.seq),
                Some(tx) if header.has_error() => {
                    let _ = tx.send(Err(CallError::Remote(header.error)));
                }
                Some(tx) => {
                    let _ = tx.send(Ok(body));
                }
            }
        };
        self.terminate_calls(err).await;
    }

    /// Marks the client shut down and completes every pending call with
    /// `err`. Holding the send mutex first excludes in-flight senders from
    /// registering against a client that is going away.
    async fn terminate_calls(&self, err: CallError) {
        let _sending = self.writer.lock().await;
        let mut state = self.state.lock();
        state.shutdown = true;
        for (_, tx) in state.pending.drain() {
            let _ = tx.send(Err(err.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_unknown_codec_rejected() {
        let options = ConnectOptions::default().with_codec("application/xml");
        let err = Client::dial_with_options("127.0.0.1:1", options)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::UnknownCodec(_)));
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // A non-routable address: SYN packets vanish, so only the timer can
        // resolve the dial.
        let options =
            ConnectOptions::default().with_connect_timeout(Duration::from_millis(300));
        let started = Instant::now();
        let result = Client::dial_with_options("10.255.255.1:9999", options).await;
        let elapsed = started.elapsed();

        assert!(result.is_err());
        // Environments without a route fail fast with an I/O error instead.
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            ClientError::ConnectTimeout | ClientError::Io(_)
        ));
        assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
    }
}
