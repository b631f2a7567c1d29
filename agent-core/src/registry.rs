//! Keyed tables mapping reconnection token to a live Management or
//! ExtensionHost connection, plus the two connection types themselves.
//!
//! `DashMap::entry` gives the atomic check-then-insert the token-uniqueness
//! invariant requires without a hand-rolled mutex around a `HashMap` — the
//! same "single critical section per mutation" model a plain `Mutex<HashMap>`
//! would give, just without us writing the locking by hand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{broadcast, Notify};

use crate::error::{AgentError, AgentResult};
use crate::intent::{ReconnectionToken, StartParams};
use crate::transport::{FramedTransport, Io};

/// Channel capacity for decoded control-message fanout. Sized generously
/// for a control channel; a slow subscriber drops the oldest messages
/// rather than stalling the reader.
const CONTROL_BROADCAST_CAPACITY: usize = 256;

pub struct ManagementConnection {
    token: ReconnectionToken,
    transport: Arc<FramedTransport>,
    control_tx: broadcast::Sender<Bytes>,
    closed: Arc<Notify>,
    is_closed: AtomicBool,
}

impl ManagementConnection {
    /// Builds the connection object only; does not start reading control
    /// messages yet. The caller must win the registry's atomic insert first
    /// — see `start_reading` — so a loser never leaves a reader task running
    /// against a connection nobody can reach.
    pub fn new(token: ReconnectionToken, transport: Arc<FramedTransport>) -> Arc<Self> {
        let (control_tx, _) = broadcast::channel(CONTROL_BROADCAST_CAPACITY);
        Arc::new(Self {
            token,
            transport,
            control_tx,
            closed: Arc::new(Notify::new()),
            is_closed: AtomicBool::new(false),
        })
    }

    /// Start the background reader. Call only after the connection has won
    /// its slot in the registry.
    pub fn start_reading(self: &Arc<Self>) {
        Arc::clone(self).spawn_reader();
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.control_tx.subscribe()
    }

    pub async fn on_close(&self) {
        self.closed.notified().await;
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    fn spawn_reader(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                match self.transport.recv_one().await {
                    Ok(Some(bytes)) => {
                        let _ = self.control_tx.send(bytes);
                    }
                    Ok(None) => {
                        // Peer went away without a local close signal: this
                        // is a transient loss, not termination. Stop reading
                        // and wait to be rebound by a resume.
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(token = %self.token, error = %e, "management transport read failed; awaiting resume");
                        return;
                    }
                }
            }
        });
    }

    /// Rebind the transport to a freshly-accepted socket, deliver the
    /// buffered prefix ahead of anything newly arriving, and resume
    /// reading.
    pub async fn accept_reconnection(self: &Arc<Self>, io: Io, buffered_prefix: Vec<u8>) -> AgentResult<()> {
        if !buffered_prefix.is_empty() {
            let _ = self.control_tx.send(Bytes::from(buffered_prefix));
        }
        self.transport.rebind(io, 0).await?;
        Arc::clone(self).spawn_reader();
        Ok(())
    }

    pub fn mark_closed(&self) {
        self.is_closed.store(true, Ordering::Release);
        self.closed.notify_waiters();
    }
}

pub struct ExtensionHostConnection {
    token: ReconnectionToken,
    transport: Arc<FramedTransport>,
    start_params: StartParams,
    debug_port: Option<u16>,
    closed: Arc<Notify>,
    is_closed: AtomicBool,
}

impl ExtensionHostConnection {
    pub fn new(
        token: ReconnectionToken,
        transport: Arc<FramedTransport>,
        start_params: StartParams,
        debug_port: Option<u16>,
    ) -> Arc<Self> {
        Arc::new(Self {
            token,
            transport,
            start_params,
            debug_port,
            closed: Arc::new(Notify::new()),
            is_closed: AtomicBool::new(false),
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn debug_port(&self) -> Option<u16> {
        self.debug_port
    }

    pub fn start_params(&self) -> &StartParams {
        &self.start_params
    }

    pub async fn on_close(&self) {
        self.closed.notified().await;
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub fn mark_closed(&self) {
        self.is_closed.store(true, Ordering::Release);
        self.closed.notify_waiters();
    }

    pub async fn accept_reconnection(self: &Arc<Self>, io: Io, buffered_prefix: Vec<u8>) -> AgentResult<()> {
        // The factory owns how the raw byte stream past the handshake is
        // consumed (it took the socket directly on fresh dispatch); here we
        // only need to keep our bookkeeping transport in step so a future
        // resume still sees consistent replay state.
        let _ = &buffered_prefix;
        self.transport.rebind(io, 0).await
    }
}

/// An extension-host slot is reserved atomically before the (async) work
/// that builds the real connection runs, so a second fresh connect sharing
/// the same token is rejected the instant the first reserves it — it never
/// has to wait for debug-port probing or the factory call to find out.
enum ExtensionHostSlot {
    Pending,
    Ready(Arc<ExtensionHostConnection>),
}

/// The two token -> connection mappings, plus the invariants the dispatcher
/// relies on when deciding fresh vs. resume vs. reject.
#[derive(Default)]
pub struct ConnectionRegistry {
    mgmt: DashMap<ReconnectionToken, Arc<ManagementConnection>>,
    xhost: DashMap<ReconnectionToken, ExtensionHostSlot>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_management(&self, token: &str) -> Option<Arc<ManagementConnection>> {
        self.mgmt.get(token).map(|entry| Arc::clone(entry.value()))
    }

    /// Only a fully built (`Ready`) connection is visible here; a token
    /// whose fresh-connect is still being built (`Pending`) looks absent to
    /// resume and to `extension_host_count`.
    pub fn get_extension_host(&self, token: &str) -> Option<Arc<ExtensionHostConnection>> {
        self.xhost.get(token).and_then(|entry| match entry.value() {
            ExtensionHostSlot::Ready(conn) => Some(Arc::clone(conn)),
            ExtensionHostSlot::Pending => None,
        })
    }

    pub fn extension_host_count(&self) -> usize {
        self.xhost.iter().filter(|entry| matches!(entry.value(), ExtensionHostSlot::Ready(_))).count()
    }

    /// Insert a fresh management connection, failing if the token already
    /// has a live entry. The check and the insert happen under the same
    /// `DashMap` shard lock, so this is atomic with respect to other
    /// dispatcher calls.
    pub fn insert_fresh_management(&self, token: ReconnectionToken, conn: Arc<ManagementConnection>) -> AgentResult<()> {
        match self.mgmt.entry(token) {
            Entry::Occupied(_) => Err(AgentError::DuplicateToken),
            Entry::Vacant(slot) => {
                slot.insert(conn);
                Ok(())
            }
        }
    }

    /// Atomically claim `token` for a fresh extension-host connect before
    /// any of the async work (debug-port probing, factory spawn) that
    /// produces the real connection object runs. Must be paired with either
    /// `finalize_extension_host` or `abandon_extension_host_reservation`.
    pub fn reserve_extension_host(&self, token: ReconnectionToken) -> AgentResult<()> {
        match self.xhost.entry(token) {
            Entry::Occupied(_) => Err(AgentError::DuplicateToken),
            Entry::Vacant(slot) => {
                slot.insert(ExtensionHostSlot::Pending);
                Ok(())
            }
        }
    }

    /// Replace a reservation with the real connection once the factory has
    /// produced one. No atomicity concern here: the token was already
    /// claimed exclusively by `reserve_extension_host`.
    pub fn finalize_extension_host(&self, token: ReconnectionToken, conn: Arc<ExtensionHostConnection>) {
        self.xhost.insert(token, ExtensionHostSlot::Ready(conn));
    }

    /// Release a reservation that never produced a connection (factory
    /// failure) — a failed spawn must never leave a registry entry behind.
    pub fn abandon_extension_host_reservation(&self, token: &str) {
        self.xhost.remove(token);
    }

    pub fn remove_management(&self, token: &str) {
        self.mgmt.remove(token);
    }

    pub fn remove_extension_host(&self, token: &str) {
        self.xhost.remove(token);
    }
}
