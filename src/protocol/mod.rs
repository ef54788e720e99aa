/// Protocol types for envelope encoding and transaction correlation
///
/// This module defines the wire format shared by requests, replies and
/// pushes, and the transaction ids that tie a reply to its request.
mod envelope;
mod transaction;

pub use envelope::{Direction, Envelope, RawEnvelope};
pub use transaction::{TransactionCounter, TransactionId};
