//! Bidirectional RPC over a single duplex message channel
//!
//! One end of a connection is the *initiator*: it invokes named actions on
//! the other end and awaits their results. The other end is the
//! *responder*: it dispatches those requests to an action table, keeps
//! per-connection state, and can push unsolicited notifications back.
//!
//! Every frame is a three-field envelope `[id, actionOrResult, argument]`.
//! Requests carry ids allocated by the initiator (1, 2, 3, ...), replies
//! echo them, and pushes use id 0. Many requests may be in flight on one
//! connection; replies are matched by id in whatever order they arrive.
//!
//! The crate does not establish transports. A channel provider implements
//! [`Channel`], [`Connector`] and [`Listener`]; [`MemoryHub`] is the
//! in-process reference provider.
//!
//! ```no_run
//! use port_rpc::{ActionTable, InitiatorBuilder, MemoryHub, ResponderBuilder};
//! use serde_json::json;
//!
//! # async fn example() -> port_rpc::Result<()> {
//! let hub = MemoryHub::new();
//!
//! let responder = ResponderBuilder::new(
//!     ActionTable::new().on("echo", |arg, _ctx| async move { Ok(arg) }),
//! )
//! .build();
//! let _server = responder.spawn(hub.clone());
//!
//! let initiator = InitiatorBuilder::new().connect(hub.as_ref(), "client").await?;
//! assert_eq!(initiator.invoke("echo", json!([1, 2])).await?, json!([1, 2]));
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod channel;
mod domain;
mod initiator;
mod macros;
mod protocol;
mod responder;
mod sync;

mod error;

pub(crate) use macros::{log_debug, log_error, log_frame, log_info, log_warn};

// Re-export main types
pub use initiator::{Initiator, InitiatorBuilder, PushTable};
pub use responder::{
    //
    ActionTable,
    BoxFuture,
    ConnectionContext,
    ConnectionState,
    Handler,
    Pusher,
    Responder,
    ResponderBuilder,
};

pub use error::{RemoteError, RemoteErrorKind, Result, RpcError};
pub use protocol::{Direction, Envelope, RawEnvelope, TransactionCounter, TransactionId};

pub use channel::{MemoryHub, DEFAULT_CAPACITY};

// --- public re-exports
pub use domain::{
    //
    Channel,
    ChannelPtr,
    Connection,
    ConnectionInfo,
    Connector,
    Listener,
};
