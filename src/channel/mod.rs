//! Channel provider implementations.
//!
//! Each provider implements the domain contracts from `crate::domain`.
//! Only the in-memory provider ships with the crate; hosts bring their own
//! for real transports.

mod memory;

pub use memory::{MemoryHub, DEFAULT_CAPACITY};
