//! Channel-backed free list of idle clients.

use crate::client::Client;
use crate::error::ClientError;
use muxrpc_protocol::ConnectOptions;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex;

/// A fixed-capacity pool of idle [`Client`]s for one address.
///
/// `get` pops an idle client or dials a new one; `put` returns a client to
/// the pool or closes it when the pool is full.
pub struct ConnectionPool {
    addr: String,
    options: ConnectOptions,
    idle_tx: mpsc::Sender<Client>,
    idle_rx: Mutex<mpsc::Receiver<Client>>,
}

impl ConnectionPool {
    pub fn new(addr: impl Into<String>, options: ConnectOptions, size: usize) -> Self {
        let (idle_tx, idle_rx) = mpsc::channel(size.max(1));
        Self {
            addr: addr.into(),
            options,
            idle_tx,
            idle_rx: Mutex::new(idle_rx),
        }
    }

    /// Dials up to `count` connections and parks them in the pool.
    pub async fn prewarm(&self, count: usize) -> Result<(), ClientError> {
        for _ in 0..count {
            let client = Client::dial_with_options(&self.addr, self.options.clone()).await?;
            self.put(client).await;
        }
        Ok(())
    }

    /// Fetches an available connection or dials anew.
    pub async fn get(&self) -> Result<Client, ClientError> {
        let idle = self.idle_rx.lock().await.try_recv().ok();
        match idle {
            Some(client) if client.is_available() => Ok(client),
            _ => Client::dial_with_options(&self.addr, self.options.clone()).await,
        }
    }

    /// Returns a connection to the pool; closes it when the pool is full or
    /// the client is no longer usable.
    pub async fn put(&self, client: Client) {
        if !client.is_available() {
            return;
        }
        if let Err(TrySendError::Full(client) | TrySendError::Closed(client)) =
            self.idle_tx.try_send(client)
        {
            let _ = client.close().await;
        }
    }

    /// Closes every idle connection.
    pub async fn close(&self) {
        let mut idle = self.idle_rx.lock().await;
        while let Ok(client) = idle.try_recv() {
            let _ = client.close().await;
        }
    }
}
