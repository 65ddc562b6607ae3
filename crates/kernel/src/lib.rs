//! World kernel: the live set of persistable objects, their ids and the
//! type table used to rebuild them.
//!
//! # Invariants
//! - Ids are issued by one allocator and never reused within a process.
//! - Objects are owned by the world; everything else refers to them by handle.
//! - Enumeration is in ascending id order.

pub mod entity;
pub mod ids;
pub mod registry;
pub mod world;

#[cfg(test)]
mod testing;

pub use entity::{LoadContext, Persistable, PersistentType};
pub use ids::{IdAllocator, IdError, MAX_ID};
pub use registry::{TypeHandle, TypeRegistry};
pub use world::World;
