//! Responder dispatch engine.
//!
//! Accepts connections from a [`Listener`], keeps one [`ConnectionState`]
//! per connection, dispatches requests to its [`ActionTable`] and replies
//! with the same transaction id.

mod connection;
mod handler;
mod state;

pub use connection::{ConnectionContext, Pusher};
pub use handler::{ActionTable, BoxFuture, Handler};
pub use state::ConnectionState;

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{log_debug, log_info, Connection, ConnectionInfo, Listener, Result};

type ConnectHook = Box<dyn Fn(&ConnectionInfo, Pusher, &mut ConnectionState) + Send + Sync>;
type DisconnectHook = Box<dyn Fn(&ConnectionInfo, &mut ConnectionState) + Send + Sync>;

/// Configuration shared by every connection of one responder.
pub(crate) struct Shared {
    actions: Arc<ActionTable>,
    on_connect: Option<ConnectHook>,
    on_disconnect: Option<DisconnectHook>,
    trace: bool,
}

/// Builder for a [`Responder`].
///
/// # Examples
///
/// ```no_run
/// use port_rpc::{ActionTable, MemoryHub, ResponderBuilder};
/// use serde_json::json;
///
/// # async fn example() -> port_rpc::Result<()> {
/// let actions = ActionTable::new().on_sync("sum", |arg, ctx| {
///     let n = arg.as_i64().unwrap_or(0);
///     let total = ctx.with_state(|s| {
///         let total = s.get_or_insert_with("total", || 0_i64);
///         *total += n;
///         *total
///     });
///     Ok(json!(total))
/// });
///
/// let responder = ResponderBuilder::new(actions)
///     .on_connect(|info, _push, state| {
///         println!("{info} connected");
///         state.insert("total", 0_i64);
///     })
///     .on_disconnect(|info, _state| println!("{info} left"))
///     .build();
///
/// let hub = MemoryHub::new();
/// let _server = responder.spawn(hub.clone());
/// # Ok(())
/// # }
/// ```
pub struct ResponderBuilder {
    // ---
    actions: ActionTable,
    on_connect: Option<ConnectHook>,
    on_disconnect: Option<DisconnectHook>,
    trace_envelopes: bool,
}

impl ResponderBuilder {
    /// Create a builder around a fixed action table.
    pub fn new(actions: ActionTable) -> Self {
        // ---
        Self {
            actions,
            on_connect: None,
            on_disconnect: None,
            trace_envelopes: true,
        }
    }

    /// Hook run for each new connection before its first request is read.
    ///
    /// Receives the connection metadata, its push function and its freshly
    /// created state.
    pub fn on_connect<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ConnectionInfo, Pusher, &mut ConnectionState) + Send + Sync + 'static,
    {
        self.on_connect = Some(Box::new(hook));
        self
    }

    /// Hook run once per connection after it closes, before its state is
    /// discarded.
    ///
    /// Listeners registered in the connect hook are not tracked by the
    /// responder; tear them down here.
    pub fn on_disconnect<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ConnectionInfo, &mut ConnectionState) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Box::new(hook));
        self
    }

    /// Emit a `debug` line for every envelope sent and received.
    ///
    /// Default: enabled.
    pub fn trace_envelopes(mut self, enabled: bool) -> Self {
        self.trace_envelopes = enabled;
        self
    }

    pub fn build(self) -> Responder {
        // ---
        let (shutdown_tx, _) = watch::channel(false);

        Responder {
            shared: Arc::new(Shared {
                actions: Arc::new(self.actions),
                on_connect: self.on_connect,
                on_disconnect: self.on_disconnect,
                trace: self.trace_envelopes,
            }),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }
}

/// Responder dispatch engine.
///
/// Cheap to clone; clones share the action table, the hooks and the
/// shutdown signal.
#[derive(Clone)]
pub struct Responder {
    shared: Arc<Shared>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Responder {
    /// Serve a single connection on a new task.
    ///
    /// For hosts that run their own accept loop.
    pub fn serve_connection(&self, connection: Connection) -> JoinHandle<()> {
        // ---
        tokio::spawn(connection::serve(connection, self.shared.clone()))
    }

    /// Accept connections from `listener` until it closes or
    /// [`shutdown`](Self::shutdown) is called.
    ///
    /// Each connection is served on its own task; established connections
    /// keep running after the accept loop stops.
    pub async fn run<L>(&self, listener: &L) -> Result<()>
    where
        L: Listener + ?Sized,
    {
        // ---
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        log_debug!("responder accept loop started");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Some(connection) => {
                        self.serve_connection(connection);
                    }
                    None => {
                        log_info!("listener closed, accept loop stopped");
                        break;
                    }
                },
                _ = shutdown_rx.changed() => {
                    log_info!("responder shut down, accept loop stopped");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Run the accept loop on a background task.
    pub fn spawn<L>(&self, listener: Arc<L>) -> JoinHandle<Result<()>>
    where
        L: Listener + ?Sized + 'static,
    {
        // ---
        let responder = self.clone();
        tokio::spawn(async move { responder.run(listener.as_ref()).await })
    }

    /// Stop accepting new connections.
    pub fn shutdown(&self) {
        // ---
        self.shutdown_tx.send_replace(true);
    }
}
