use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::sync::panic_message;
use crate::{Result, RpcError};

/// Type-erased push handler.
type PushFn = Arc<dyn Fn(Value) -> Result<()> + Send + Sync>;

/// Initiator-side action table for unsolicited pushes.
///
/// Built up front and handed to [`InitiatorBuilder`](crate::InitiatorBuilder);
/// it is not modified once the initiator is running.
///
/// ```
/// use port_rpc::PushTable;
///
/// let pushes = PushTable::new()
///     .on("alert", |arg| println!("alert: {arg}"))
///     .on_typed("battery", |percent: u8| println!("battery at {percent}%"));
/// assert!(pushes.contains("alert"));
/// ```
#[derive(Clone, Default)]
pub struct PushTable {
    handlers: HashMap<String, PushFn>,
}

impl PushTable {
    // ---
    pub fn new() -> Self {
        // ---
        Self::default()
    }

    /// Register a handler receiving the raw push argument.
    pub fn on<F>(mut self, action: &str, handler: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        // ---
        self.handlers.insert(
            action.to_string(),
            Arc::new(move |arg: Value| -> Result<()> {
                handler(arg);
                Ok(())
            }),
        );
        self
    }

    /// Register a handler whose argument is deserialized into `T` first.
    ///
    /// Pushes whose argument does not deserialize are dropped with a
    /// diagnostic.
    pub fn on_typed<T, F>(mut self, action: &str, handler: F) -> Self
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        // ---
        self.handlers.insert(
            action.to_string(),
            Arc::new(move |arg: Value| -> Result<()> {
                let typed: T = serde_json::from_value(arg)?;
                handler(typed);
                Ok(())
            }),
        );
        self
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

    /// Run the handler for `action`.
    ///
    /// A panicking handler is contained here and reported as
    /// [`RpcError::Handler`].
    pub(crate) fn dispatch(&self, action: &str, arg: Value) -> Result<()> {
        // ---
        let handler = self
            .handlers
            .get(action)
            .ok_or_else(|| RpcError::UnknownAction(action.to_string()))?;

        match catch_unwind(AssertUnwindSafe(|| handler(arg))) {
            Ok(result) => result,
            Err(panic) => Err(RpcError::Handler(panic_message(&*panic))),
        }
    }
}
