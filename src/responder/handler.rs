use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::ConnectionContext;
use crate::{Result, RpcError};

/// Boxed, sendable future returned by handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Responder-side action handler.
///
/// Implemented for you by [`ActionTable::on`], [`ActionTable::on_sync`] and
/// [`ActionTable::typed`]; implement it directly for handlers that carry
/// their own state.
pub trait Handler: Send + Sync {
    /// Run the action for one request.
    ///
    /// Whatever runs before the returned future is first polled, and the
    /// future's first poll, happen in request arrival order for a
    /// connection.
    fn call(&self, arg: Value, ctx: ConnectionContext) -> BoxFuture<'static, Result<Value>>;
}

struct AsyncFn<F>(F);

impl<F, Fut> Handler for AsyncFn<F>
where
    F: Fn(Value, ConnectionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn call(&self, arg: Value, ctx: ConnectionContext) -> BoxFuture<'static, Result<Value>> {
        Box::pin((self.0)(arg, ctx))
    }
}

struct SyncFn<F>(F);

impl<F> Handler for SyncFn<F>
where
    F: Fn(Value, ConnectionContext) -> Result<Value> + Send + Sync + 'static,
{
    fn call(&self, arg: Value, ctx: ConnectionContext) -> BoxFuture<'static, Result<Value>> {
        let result = (self.0)(arg, ctx);
        Box::pin(async move { result })
    }
}

// Typed handler: deserializes the argument, serializes the result
struct Typed<F, Fut, TReq, TResp> {
    func: F,
    _phantom: PhantomData<fn(TReq, TResp, Fut)>,
}

impl<F, Fut, TReq, TResp> Handler for Typed<F, Fut, TReq, TResp>
where
    F: Fn(TReq, ConnectionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TResp>> + Send + 'static,
    TReq: DeserializeOwned + Send + 'static,
    TResp: Serialize + Send + 'static,
{
    fn call(&self, arg: Value, ctx: ConnectionContext) -> BoxFuture<'static, Result<Value>> {
        // Deserialize request
        let req: TReq = match serde_json::from_value(arg) {
            Ok(r) => r,
            Err(e) => {
                let err = RpcError::from(e);
                return Box::pin(async move { Err::<Value, _>(err) });
            }
        };

        // Call handler
        let fut = (self.func)(req, ctx);

        Box::pin(async move {
            let resp = fut.await?;
            Ok::<Value, RpcError>(serde_json::to_value(resp)?)
        })
    }
}

/// Responder-side action table: action name → handler.
///
/// Built before the responder starts and fixed afterwards.
///
/// ```
/// use port_rpc::ActionTable;
/// use serde_json::json;
///
/// let actions = ActionTable::new()
///     .on("echo", |arg, _ctx| async move { Ok(arg) })
///     .on_sync("ping", |_arg, _ctx| Ok(json!("pong")))
///     .typed("double", |n: i64, _ctx| async move { Ok(n * 2) });
/// assert_eq!(actions.len(), 3);
/// ```
#[derive(Clone, Default)]
pub struct ActionTable {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl ActionTable {
    // ---
    pub fn new() -> Self {
        // ---
        Self::default()
    }

    /// Register an asynchronous handler over raw JSON values.
    pub fn on<F, Fut>(self, action: &str, handler: F) -> Self
    where
        F: Fn(Value, ConnectionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        // ---
        self.insert(action, AsyncFn(handler))
    }

    /// Register a handler that produces its result without suspending.
    pub fn on_sync<F>(self, action: &str, handler: F) -> Self
    where
        F: Fn(Value, ConnectionContext) -> Result<Value> + Send + Sync + 'static,
    {
        // ---
        self.insert(action, SyncFn(handler))
    }

    /// Register an asynchronous handler with serde-typed argument and result.
    ///
    /// An argument that fails to deserialize is reported to the caller as a
    /// handler error.
    pub fn typed<TReq, TResp, F, Fut>(self, action: &str, handler: F) -> Self
    where
        TReq: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TReq, ConnectionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        // ---
        self.insert(
            action,
            Typed {
                func: handler,
                _phantom: PhantomData,
            },
        )
    }

    /// Register any [`Handler`] implementation.
    pub fn insert<H>(mut self, action: &str, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        // ---
        self.handlers.insert(action.to_string(), Arc::new(handler));
        self
    }

    pub fn get(&self, action: &str) -> Option<Arc<dyn Handler>> {
        // ---
        self.handlers.get(action).cloned()
    }

    pub fn contains(&self, action: &str) -> bool {
        // ---
        self.handlers.contains_key(action)
    }

    pub fn len(&self) -> usize {
        // ---
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        // ---
        self.handlers.is_empty()
    }
}
