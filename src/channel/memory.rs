//! In-memory channel provider.
//!
//! This module provides a pure in-process implementation of the domain-level
//! [`Channel`], [`Connector`] and [`Listener`] contracts. It is intended
//! primarily for testing, local execution, and as a reference for channel
//! semantics.
//!
//! ## Reference Semantics
//!
//! - Frames are delivered in send order within each direction, exactly once.
//! - `close()` from either end terminates both inboxes after any frames
//!   already queued have been drained.
//! - Dropping the last handle to one end closes the connection the same way.
//! - `connect()` fails if no listener can take the connection.
//!
//! ## Non-Goals
//!
//! This provider does not emulate latency, loss or framing of any real
//! transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::sync::lock_ignore_poison;
use crate::{
    // ---
    log_debug,
    log_info,
    Channel,
    Connection,
    ConnectionInfo,
    Connector,
    Listener,
    Result,
    RpcError,
};

/// Default depth of each direction's frame queue.
pub const DEFAULT_CAPACITY: usize = 64;

/// Shared rendezvous point for in-memory connections.
///
/// Initiators call [`connect`](Connector::connect); the responder side pulls
/// the matching ends out of [`accept`](Listener::accept). Each hub behaves
/// like one listening endpoint, so tests that run in parallel should each
/// create their own.
///
/// ```
/// # use port_rpc::{MemoryHub, Connector, Listener};
/// # async fn example() -> port_rpc::Result<()> {
/// let hub = MemoryHub::new();
/// let initiator_end = hub.connect("popup").await?;
/// let responder_end = hub.accept().await.expect("hub open");
/// assert_eq!(initiator_end.info(), responder_end.info());
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    capacity: usize,
    next_connection_id: AtomicU64,
    pending_tx: Mutex<Option<mpsc::UnboundedSender<Connection>>>,
    pending_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Connection>>,
}

impl MemoryHub {
    /// Create a new hub with the default queue depth.
    pub fn new() -> Arc<Self> {
        // ---
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new hub whose per-direction queues hold `capacity` frames.
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        // ---
        let (tx, rx) = mpsc::unbounded_channel();

        Arc::new(Self {
            capacity: capacity.max(1),
            next_connection_id: AtomicU64::new(1),
            pending_tx: Mutex::new(Some(tx)),
            pending_rx: tokio::sync::Mutex::new(rx),
        })
    }

    /// Stop accepting connections.
    ///
    /// Pending `accept()` calls return `None` once queued connections are
    /// drained; later `connect()` calls fail. Established connections are
    /// not affected.
    pub fn shutdown(&self) {
        // ---
        lock_ignore_poison(&self.pending_tx).take();
    }
}

#[async_trait::async_trait]
impl Connector for MemoryHub {
    // ---
    async fn connect(&self, peer: &str) -> Result<Connection> {
        // ---
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let info = ConnectionInfo::new(connection_id, peer);

        let (to_responder, responder_inbox) = mpsc::channel(self.capacity);
        let (to_initiator, initiator_inbox) = mpsc::channel(self.capacity);

        let link = Arc::new(Link {
            to_responder: Mutex::new(Some(to_responder)),
            to_initiator: Mutex::new(Some(to_initiator)),
        });

        let initiator_end = Connection {
            channel: Arc::new(MemoryChannel {
                info: info.clone(),
                link: link.clone(),
                side: Side::Initiator,
            }),
            inbox: initiator_inbox,
        };

        let responder_end = Connection {
            channel: Arc::new(MemoryChannel {
                info,
                link,
                side: Side::Responder,
            }),
            inbox: responder_inbox,
        };

        let sent = match lock_ignore_poison(&self.pending_tx).as_ref() {
            Some(tx) => tx.send(responder_end).is_ok(),
            None => false,
        };

        if !sent {
            return Err(RpcError::Transport("memory hub is not accepting".into()));
        }

        log_debug!("memory hub: connected {}", initiator_end.info());
        Ok(initiator_end)
    }
}

#[async_trait::async_trait]
impl Listener for MemoryHub {
    // ---
    async fn accept(&self) -> Option<Connection> {
        // ---
        self.pending_rx.lock().await.recv().await
    }
}

/// Both directions of one connection.
///
/// Dropping a sender terminates the corresponding inbox, so closing is just
/// taking both senders out.
struct Link {
    to_responder: Mutex<Option<mpsc::Sender<Bytes>>>,
    to_initiator: Mutex<Option<mpsc::Sender<Bytes>>>,
}

impl Link {
    /// Returns false if the link was already closed.
    fn close(&self) -> bool {
        // ---
        let had_responder = lock_ignore_poison(&self.to_responder).take().is_some();
        let had_initiator = lock_ignore_poison(&self.to_initiator).take().is_some();
        had_responder || had_initiator
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Initiator,
    Responder,
}

struct MemoryChannel {
    info: ConnectionInfo,
    link: Arc<Link>,
    side: Side,
}

#[async_trait::async_trait]
impl Channel for MemoryChannel {
    // ---
    fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    async fn send(&self, frame: Bytes) -> Result<()> {
        // ---
        let slot = match self.side {
            Side::Initiator => &self.link.to_responder,
            Side::Responder => &self.link.to_initiator,
        };

        // Clone out of the lock; the guard must not live across the await.
        let sender = lock_ignore_poison(slot).clone();

        match sender {
            Some(tx) => tx.send(frame).await.map_err(|_| RpcError::ConnectionLost),
            None => Err(RpcError::ConnectionLost),
        }
    }

    async fn close(&self) -> Result<()> {
        // ---
        if self.link.close() {
            log_info!("memory channel {} closed by {:?}", self.info, self.side);
        }
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        // ---
        if self.link.close() {
            log_debug!("memory channel {} dropped by {:?}", self.info, self.side);
        }
    }
}
