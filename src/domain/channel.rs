// src/domain/channel.rs

//! Channel provider abstractions.
//!
//! This module defines the contract a channel provider must satisfy for the
//! initiator and responder engines to run on top of it. It intentionally
//! avoids any reference to a concrete transport.
//!
//! A provider is responsible only for delivering opaque frames between the
//! two ends of one connection, in order within each direction and at most
//! once. Envelope classification, correlation and dispatch are handled
//! elsewhere.
//!
//! Concrete implementations of this interface live under `src/channel/`.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::Result;

/// Metadata describing one accepted or established connection.
///
/// Handed to responder handlers and hooks as the "sender" of a request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionInfo {
    /// Provider-assigned id, unique per provider instance.
    pub connection_id: u64,

    /// Free-form label for the remote end (tab, process, peer address...).
    pub peer: Arc<str>,
}

impl ConnectionInfo {
    pub fn new(connection_id: u64, peer: impl Into<Arc<str>>) -> Self {
        // ---
        Self {
            connection_id,
            peer: peer.into(),
        }
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        write!(f, "{}#{}", self.peer, self.connection_id)
    }
}

/// Outbound half of a duplex channel.
///
/// Implementations must ensure that:
/// - frames sent through one `Channel` arrive at the peer's inbox in send
///   order, each at most once;
/// - after `close()` no further frames are delivered in either direction and
///   both inboxes terminate;
/// - dropping the last handle to one end has the same effect as `close()`.
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show explicit
/// lifetimes and a boxed `Future`. Consumers should treat methods as normal
/// `async fn`s.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    // ---
    /// Metadata of the connection this channel belongs to.
    fn info(&self) -> &ConnectionInfo;

    /// Send one encoded envelope to the peer.
    ///
    /// Returns [`RpcError::ConnectionLost`](crate::RpcError::ConnectionLost)
    /// once the channel is closed.
    async fn send(&self, frame: Bytes) -> Result<()>;

    /// Tear down the connection in both directions.
    async fn close(&self) -> Result<()>;
}

/// Shared channel pointer.
///
/// `.clone()` only bumps a reference count; all clones address the same
/// connection.
pub type ChannelPtr = Arc<dyn Channel>;

/// One end of an established connection.
///
/// The `inbox` yields frames from the peer. When it returns `None` the
/// connection has closed; this is the provider's disconnect notification.
pub struct Connection {
    // ---
    pub channel: ChannelPtr,
    pub inbox: mpsc::Receiver<Bytes>,
}

impl Connection {
    pub fn info(&self) -> &ConnectionInfo {
        // ---
        self.channel.info()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        f.debug_struct("Connection")
            .field("info", self.channel.info())
            .finish_non_exhaustive()
    }
}

/// Initiator-side half of a provider: opens a connection to the responder.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, peer: &str) -> Result<Connection>;
}

/// Responder-side half of a provider: yields one connection per accepted peer.
#[async_trait::async_trait]
pub trait Listener: Send + Sync {
    /// Wait for the next connection. `None` means the provider shut down.
    async fn accept(&self) -> Option<Connection>;
}
