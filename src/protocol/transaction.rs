use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction identifier used to match requests and replies.
///
/// Ids are allocated by the initiator only, starting at 1 and increasing for
/// the lifetime of a connection. Id 0 is reserved for push envelopes and is
/// never allocated for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Id carried by push envelopes.
    pub const PUSH: TransactionId = TransactionId(0);

    /// Raw wire value.
    pub fn get(self) -> u64 {
        // ---
        self.0
    }

    /// True for the reserved push id.
    pub fn is_push(self) -> bool {
        // ---
        self.0 == 0
    }
}

impl From<u64> for TransactionId {
    fn from(value: u64) -> Self {
        // ---
        Self(value)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        write!(f, "{}", self.0)
    }
}

/// Per-connection id allocator.
///
/// Owned by one initiator connection; never shared across connections.
#[derive(Debug, Default)]
pub struct TransactionCounter {
    last: u64,
}

impl TransactionCounter {
    pub fn new() -> Self {
        // ---
        Self::default()
    }

    /// Allocate the next id. The first id returned is 1.
    pub fn next_id(&mut self) -> TransactionId {
        // ---
        self.last += 1;
        TransactionId(self.last)
    }
}
