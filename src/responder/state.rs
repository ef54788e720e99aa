use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// Per-connection, handler-defined storage.
///
/// Maps string keys to values of any `Send` type. One instance exists per
/// accepted connection; it is seeded by the connect hook, read and written
/// by handlers, handed to the disconnect hook and then discarded.
///
/// Lookups are typed: asking for a key with the wrong type behaves as if
/// the key were absent.
///
/// ```
/// use port_rpc::ConnectionState;
///
/// let mut state = ConnectionState::new();
/// state.insert("total", 0_i64);
/// *state.get_mut::<i64>("total").unwrap() += 7;
/// assert_eq!(state.get::<i64>("total"), Some(&7));
/// assert_eq!(state.get::<String>("total"), None);
/// ```
#[derive(Default)]
pub struct ConnectionState {
    entries: HashMap<String, Box<dyn Any + Send>>,
}

impl ConnectionState {
    // ---
    pub fn new() -> Self {
        // ---
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn insert<T>(&mut self, key: impl Into<String>, value: T)
    where
        T: Any + Send,
    {
        // ---
        self.entries.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        // ---
        self.entries.get(key)?.downcast_ref::<T>()
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        // ---
        self.entries.get_mut(key)?.downcast_mut::<T>()
    }

    /// Return the entry for `key`, inserting `init()` if it is missing or
    /// holds a different type.
    pub fn get_or_insert_with<T, F>(&mut self, key: &str, init: F) -> &mut T
    where
        T: Any + Send,
        F: FnOnce() -> T,
    {
        // ---
        let missing = match self.entries.get(key) {
            Some(value) => !value.is::<T>(),
            None => true,
        };
        if missing {
            self.entries.insert(key.to_string(), Box::new(init()));
        }

        match self.entries.get_mut(key).and_then(|v| v.downcast_mut::<T>()) {
            Some(value) => value,
            None => unreachable!("entry was just filled with a T"),
        }
    }

    /// Remove and return the entry for `key` if it holds a `T`.
    ///
    /// An entry of another type is left in place.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        // ---
        if !self.entries.get(key)?.is::<T>() {
            return None;
        }
        let boxed = self.entries.remove(key)?;
        boxed.downcast::<T>().ok().map(|b| *b)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        // ---
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        // ---
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        // ---
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        f.debug_set().entries(self.entries.keys()).finish()
    }
}
