//! Initiator correlation engine.
//!
//! The initiator owns one connection to a responder. It allocates
//! transaction ids, matches replies to waiting callers, and routes id-0
//! pushes to its [`PushTable`].

mod push;
mod registry;

pub use push::PushTable;

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::sync::lock_ignore_poison;
use crate::{
    // ---
    log_debug,
    log_error,
    log_frame,
    log_info,
    log_warn,
    Channel,
    ChannelPtr,
    Connection,
    ConnectionInfo,
    Connector,
    Direction,
    Envelope,
    Result,
    RpcError,
    TransactionId,
};
use bytes::Bytes;
use registry::TransactionRegistry;

type DisconnectHook = Box<dyn FnOnce() + Send>;

/// Builder for an [`Initiator`].
///
/// # Examples
///
/// ```no_run
/// use port_rpc::{InitiatorBuilder, MemoryHub, PushTable};
/// use std::time::Duration;
///
/// # async fn example() -> port_rpc::Result<()> {
/// let hub = MemoryHub::new();
///
/// let initiator = InitiatorBuilder::new()
///     .push_actions(PushTable::new().on("alert", |arg| println!("alert: {arg}")))
///     .on_disconnect(|| println!("responder went away"))
///     .request_timeout(Duration::from_secs(5))
///     .connect(hub.as_ref(), "content-script")
///     .await?;
///
/// let zoom = initiator.invoke("zoom", serde_json::json!(null)).await?;
/// # Ok(())
/// # }
/// ```
pub struct InitiatorBuilder {
    // ---
    pushes: PushTable,
    on_disconnect: Option<DisconnectHook>,
    request_timeout: Option<Duration>,
    trace_envelopes: bool,
}

impl InitiatorBuilder {
    /// Create a builder with an empty push table and no timeout.
    pub fn new() -> Self {
        // ---
        Self {
            pushes: PushTable::new(),
            on_disconnect: None,
            request_timeout: None,
            trace_envelopes: true,
        }
    }

    /// Set the action table used for pushes from the responder.
    pub fn push_actions(mut self, pushes: PushTable) -> Self {
        self.pushes = pushes;
        self
    }

    /// Hook fired once when the connection closes, for any reason.
    pub fn on_disconnect<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_disconnect = Some(Box::new(hook));
        self
    }

    /// Give up on a request after `timeout`.
    ///
    /// Default: no timeout; a request waits until its reply arrives or the
    /// connection is lost.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Emit a `debug` line for every envelope sent and received.
    ///
    /// Default: enabled (the lines are still subject to the subscriber's
    /// level filter).
    pub fn trace_envelopes(mut self, enabled: bool) -> Self {
        self.trace_envelopes = enabled;
        self
    }

    /// Start an initiator on an established connection.
    ///
    /// Must be called from within a tokio runtime; the receive loop runs as
    /// a spawned task.
    pub fn build(self, connection: Connection) -> Initiator {
        // ---
        let Connection { channel, inbox } = connection;
        let registry = Arc::new(Mutex::new(TransactionRegistry::new()));

        let receiver = Receiver {
            info: channel.info().clone(),
            channel: Arc::downgrade(&channel),
            registry: registry.clone(),
            pushes: self.pushes,
            on_disconnect: self.on_disconnect,
            trace: self.trace_envelopes,
        };
        let rx_task = tokio::spawn(receiver.run(inbox));

        Initiator {
            inner: Arc::new(Inner {
                channel,
                registry,
                request_timeout: self.request_timeout,
                trace: self.trace_envelopes,
                _rx_task: rx_task,
            }),
        }
    }

    /// Open a connection through `connector` and start an initiator on it.
    pub async fn connect<C>(self, connector: &C, peer: &str) -> Result<Initiator>
    where
        C: Connector + ?Sized,
    {
        // ---
        let connection = connector.connect(peer).await?;
        Ok(self.build(connection))
    }
}

impl Default for InitiatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Initiator side of one connection.
///
/// Cheap to clone; clones share the connection, the id counter and the
/// transaction registry, so concurrent `invoke()` calls from many tasks are
/// fine.
#[derive(Clone)]
pub struct Initiator {
    inner: Arc<Inner>,
}

struct Inner {
    channel: ChannelPtr,
    registry: Arc<Mutex<TransactionRegistry>>,
    request_timeout: Option<Duration>,
    trace: bool,
    _rx_task: JoinHandle<()>,
}

impl Initiator {
    /// Invoke `action` on the responder and wait for its result.
    ///
    /// # Errors
    ///
    /// - [`RpcError::ConnectionLost`] if the connection closes before the
    ///   reply arrives, or was already closed.
    /// - [`RpcError::Timeout`] if a request timeout is configured and elapses.
    /// - [`RpcError::UnknownAction`] / [`RpcError::Handler`] if the responder
    ///   reports a failed dispatch.
    pub async fn invoke(&self, action: &str, arg: Value) -> Result<Value> {
        // ---
        // The slot must exist before the frame leaves, or a fast reply could
        // find nothing to resolve.
        let (id, rx) = lock_ignore_poison(&self.inner.registry).open()?;
        let _slot = SlotGuard {
            registry: &self.inner.registry,
            id,
        };

        log_frame!(self.inner.trace, "tx[{id}][{action}] {arg}");

        let frame = Envelope::request(id, action, arg).encode()?;
        self.inner.channel.send(frame).await?;

        let received = match self.inner.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    log_debug!("tx[{id}][{action}] timed out after {limit:?}");
                    return Err(RpcError::Timeout);
                }
            },
            None => rx.await,
        };

        // A dropped slot means the registry went away with the connection
        received.unwrap_or(Err(RpcError::ConnectionLost))
    }

    /// Typed variant of [`invoke`](Self::invoke).
    pub async fn invoke_as<TReq, TResp>(&self, action: &str, req: &TReq) -> Result<TResp>
    where
        TReq: Serialize + ?Sized,
        TResp: DeserializeOwned,
    {
        // ---
        let arg = serde_json::to_value(req)?;
        let result = self.invoke(action, arg).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Close the connection.
    ///
    /// Outstanding transactions settle with [`RpcError::ConnectionLost`]
    /// immediately; the disconnect hook fires from the receive loop.
    pub async fn close(&self) -> Result<()> {
        // ---
        let settled = lock_ignore_poison(&self.inner.registry).settle_all();
        if settled > 0 {
            log_info!(
                "{}: closing with {settled} outstanding transaction(s)",
                self.inner.channel.info()
            );
        }
        self.inner.channel.close().await
    }

    /// Number of requests awaiting a reply.
    pub fn pending(&self) -> usize {
        // ---
        lock_ignore_poison(&self.inner.registry).len()
    }

    /// False once the connection has been lost or closed.
    pub fn is_connected(&self) -> bool {
        // ---
        !lock_ignore_poison(&self.inner.registry).is_closed()
    }

    pub fn info(&self) -> &ConnectionInfo {
        // ---
        self.inner.channel.info()
    }
}

/// Removes a transaction's slot when its `invoke()` ends, however it ends.
///
/// After a reply or a bulk settle the slot is already gone and this is a
/// no-op.
struct SlotGuard<'a> {
    registry: &'a Mutex<TransactionRegistry>,
    id: TransactionId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        // ---
        lock_ignore_poison(self.registry).abandon(self.id);
    }
}

/// State moved into the receive loop task.
///
/// Holds the channel weakly: once every [`Initiator`] handle is gone the
/// channel is dropped, which ends the inbox and with it this loop.
struct Receiver {
    info: ConnectionInfo,
    channel: Weak<dyn Channel>,
    registry: Arc<Mutex<TransactionRegistry>>,
    pushes: PushTable,
    on_disconnect: Option<DisconnectHook>,
    trace: bool,
}

impl Receiver {
    // ---
    async fn run(self, mut inbox: mpsc::Receiver<Bytes>) {
        // ---
        let Receiver {
            info,
            channel,
            registry,
            pushes,
            on_disconnect,
            trace,
        } = self;

        log_debug!("{info}: initiator receive loop started");

        while let Some(frame) = inbox.recv().await {
            if let Err(e) = route_frame(&frame, &registry, &pushes, trace) {
                log_error!("{info}: closing corrupted connection: {e}");
                if let Some(channel) = channel.upgrade() {
                    if let Err(e) = channel.close().await {
                        log_warn!("{info}: close failed: {e}");
                    }
                }
                break;
            }
        }

        let abandoned = lock_ignore_poison(&registry).settle_all();
        log_info!("{info}: disconnected, {abandoned} transaction(s) abandoned");

        if let Some(hook) = on_disconnect {
            hook();
        }
    }
}

/// Route one inbound frame. Only a malformed frame is an error here;
/// everything else is dropped with a diagnostic.
fn route_frame(
    frame: &[u8],
    registry: &Mutex<TransactionRegistry>,
    pushes: &PushTable,
    trace: bool,
) -> Result<()> {
    // ---
    match Envelope::decode(frame, Direction::ToInitiator)? {
        Envelope::Reply { id, outcome } => {
            log_frame!(trace, "rx[{id}] {outcome:?}");

            let outcome = outcome.map_err(RpcError::from);
            if let Err(e) = lock_ignore_poison(registry).resolve(id, outcome) {
                log_warn!("dropping reply: {e}");
            }
        }
        Envelope::Push { action, arg } => {
            log_frame!(trace, "rx[0][{action}] {arg}");

            if let Err(e) = pushes.dispatch(&action, arg) {
                log_warn!("dropping push [{action}]: {e}");
            }
        }
        Envelope::Request { id, action, .. } => {
            // Direction::ToInitiator never classifies a frame as a request
            log_warn!("dropping unexpected request rx[{id}][{action}]");
        }
    }
    Ok(())
}
