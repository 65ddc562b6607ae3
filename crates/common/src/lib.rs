//! Shared types and the binary codec for keepsake.
//!
//! # Invariants
//! - Persistent id 0 is never issued; `Handle::NONE` refers to nothing.
//! - The codec is the only place that knows the byte layout of primitives.

pub mod codec;
pub mod types;

pub use codec::{ByteReader, ByteWriter, CodecError};
pub use types::{Handle, OriginKey, PersistentId, Transform};
