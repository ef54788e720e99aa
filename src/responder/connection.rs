//! Per-connection dispatch loop.
//!
//! Each accepted connection runs in its own task. Inbound requests are
//! turned into handler futures that are driven from that same task, so a
//! suspended handler never blocks the next request, while handlers of one
//! connection are still started in the order their requests arrived.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::task::Poll;

use bytes::Bytes;
use futures::future::poll_fn;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{ActionTable, BoxFuture, ConnectionState, Handler, Shared};
use crate::sync::{lock_ignore_poison, panic_message};
use crate::{
    // ---
    log_debug,
    log_error,
    log_frame,
    log_info,
    log_warn,
    ChannelPtr,
    Connection,
    ConnectionInfo,
    Direction,
    Envelope,
    RemoteError,
    Result,
    RpcError,
    TransactionId,
};

/// Sends push envelopes (`[0, action, arg]`) to the initiator of one
/// connection.
///
/// Handed to the connect hook and reachable from handlers through
/// [`ConnectionContext::pusher`]. Clones address the same connection and may
/// be moved into listener tasks; once the connection closes every push
/// fails with [`RpcError::ConnectionLost`].
#[derive(Clone)]
pub struct Pusher {
    channel: ChannelPtr,
    trace: bool,
}

impl Pusher {
    pub(crate) fn new(channel: ChannelPtr, trace: bool) -> Self {
        // ---
        Self { channel, trace }
    }

    /// Send a fire-and-forget notification. No reply is expected.
    pub async fn push(&self, action: &str, arg: Value) -> Result<()> {
        // ---
        log_frame!(self.trace, "tx[0][{action}] {arg} to {}", self.channel.info());

        let frame = Envelope::push(action, arg).encode()?;
        self.channel.send(frame).await
    }

    /// Typed variant of [`push`](Self::push).
    pub async fn push_as<T>(&self, action: &str, arg: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        // ---
        self.push(action, serde_json::to_value(arg)?).await
    }

    pub fn info(&self) -> &ConnectionInfo {
        // ---
        self.channel.info()
    }
}

/// Everything a handler knows about the connection it serves.
///
/// Cloning is cheap; clones share the same [`ConnectionState`].
#[derive(Clone)]
pub struct ConnectionContext {
    info: ConnectionInfo,
    state: Arc<Mutex<ConnectionState>>,
    pusher: Pusher,
}

impl ConnectionContext {
    /// Metadata of the connection (the request's sender).
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Run `f` with exclusive access to the connection state.
    ///
    /// The lock is held only for the duration of `f`; do not call back into
    /// `with_state` from inside it.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut ConnectionState) -> R) -> R {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        f(&mut state)
    }

    /// Push primitive for this connection.
    pub fn pusher(&self) -> &Pusher {
        &self.pusher
    }
}

/// Serve one connection until it closes.
pub(crate) async fn serve(connection: Connection, shared: Arc<Shared>) {
    // ---
    let Connection { channel, inbox } = connection;
    let info = channel.info().clone();
    let state = Arc::new(Mutex::new(ConnectionState::new()));
    let pusher = Pusher::new(channel.clone(), shared.trace);

    log_info!("{info}: connected");

    let seeded = match &shared.on_connect {
        Some(hook) => {
            let mut guard = lock_ignore_poison(&state);
            catch_unwind(AssertUnwindSafe(|| hook(&info, pusher.clone(), &mut guard)))
        }
        None => Ok(()),
    };

    let abandoned = match seeded {
        Ok(()) => {
            let ctx = ConnectionContext {
                info: info.clone(),
                state: state.clone(),
                pusher,
            };
            pump(inbox, &channel, &shared, ctx).await
        }
        Err(panic) => {
            log_error!("{info}: connect hook panicked: {}", panic_message(&*panic));
            close_channel(&channel, &info).await;
            0
        }
    };

    log_info!("{info}: disconnected, {abandoned} request(s) abandoned");

    let mut guard = lock_ignore_poison(&state);
    if let Some(hook) = &shared.on_disconnect {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook(&info, &mut guard))) {
            log_error!("{info}: disconnect hook panicked: {}", panic_message(&*panic));
        }
    }
    guard.clear();
}

/// Read and dispatch requests until the inbox ends or a corrupted frame
/// arrives. Returns the number of handlers still running at that point;
/// they are dropped without replying.
async fn pump(
    mut inbox: mpsc::Receiver<Bytes>,
    channel: &ChannelPtr,
    shared: &Shared,
    ctx: ConnectionContext,
) -> usize {
    // ---
    let info = ctx.info.clone();
    let mut in_flight = FuturesUnordered::new();

    loop {
        tokio::select! {
            frame = inbox.recv() => {
                let Some(frame) = frame else { break };

                match Envelope::decode(&frame, Direction::ToResponder) {
                    Ok(Envelope::Request { id, action, arg }) => {
                        log_frame!(shared.trace, "rx[{id}][{action}] {arg}");
                        let mut reply = dispatch(
                            &shared.actions,
                            channel.clone(),
                            ctx.clone(),
                            id,
                            action,
                            arg,
                            shared.trace,
                        );

                        // First poll happens here, in arrival order
                        let first = poll_fn(|cx| Poll::Ready(reply.poll_unpin(cx))).await;
                        if first.is_pending() {
                            in_flight.push(reply);
                        }
                    }
                    Ok(other) => {
                        log_warn!("{info}: dropping unexpected envelope {other:?}");
                    }
                    Err(e @ RpcError::UnexpectedPushOnResponder(_)) => {
                        log_warn!("{info}: dropping envelope: {e}");
                    }
                    Err(e) => {
                        log_error!("{info}: closing corrupted connection: {e}");
                        close_channel(channel, &info).await;
                        break;
                    }
                }
            }
            Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
        }
    }

    in_flight.len()
}

async fn close_channel(channel: &ChannelPtr, info: &ConnectionInfo) {
    // ---
    if let Err(e) = channel.close().await {
        log_warn!("{info}: close failed: {e}");
    }
}

/// Start one request and return the future that finishes it and sends its
/// reply.
///
/// The handler is invoked before this returns. The returned future never
/// fails: handler errors, panics and unknown actions become error replies so
/// one bad transaction cannot disturb the others.
fn dispatch(
    actions: &ActionTable,
    channel: ChannelPtr,
    ctx: ConnectionContext,
    id: TransactionId,
    action: Arc<str>,
    arg: Value,
    trace: bool,
) -> BoxFuture<'static, ()> {
    // ---
    let started = match actions.get(&action) {
        Some(handler) => start_handler(handler.as_ref(), &action, arg, ctx),
        None => {
            log_warn!("rx[{id}]: no handler for action: {action}");
            Err(RemoteError::unknown_action(&action))
        }
    };

    Box::pin(async move {
        let outcome = match started {
            Ok(fut) => finish_handler(fut, &action).await,
            Err(e) => Err(e),
        };

        log_frame!(trace, "tx[{id}] {outcome:?}");

        let sent = match Envelope::reply(id, outcome).encode() {
            Ok(frame) => channel.send(frame).await,
            Err(e) => Err(e),
        };

        if let Err(e) = sent {
            log_debug!("tx[{id}]: reply not delivered: {e}");
        }
    })
}

fn start_handler(
    handler: &dyn Handler,
    action: &str,
    arg: Value,
    ctx: ConnectionContext,
) -> std::result::Result<BoxFuture<'static, Result<Value>>, RemoteError> {
    // ---
    catch_unwind(AssertUnwindSafe(|| handler.call(arg, ctx))).map_err(|panic| {
        let msg = panic_message(&*panic);
        log_error!("handler [{action}] panicked: {msg}");
        RemoteError::handler(msg)
    })
}

async fn finish_handler(
    fut: BoxFuture<'static, Result<Value>>,
    action: &str,
) -> std::result::Result<Value, RemoteError> {
    // ---
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            log_warn!("handler [{action}] failed: {e}");
            Err(RemoteError::from(&e))
        }
        Err(panic) => {
            let msg = panic_message(&*panic);
            log_error!("handler [{action}] panicked: {msg}");
            Err(RemoteError::handler(msg))
        }
    }
}
