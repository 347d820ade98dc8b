//! # Contracts
//!
//! Frozen interface contracts (ICD), defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Record Model
//! - A record is an opaque `(destination, payload)` pair
//! - Payloads are `bytes::Bytes`, so fan-out clones share one buffer

mod blueprint;
mod error;
mod policy;
mod record;
mod sink;

pub use blueprint::*;
pub use error::*;
pub use policy::*;
pub use record::Record;
pub use sink::*;
