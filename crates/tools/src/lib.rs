//! Developer tooling: world and save blob inspectors.

pub mod blob;
pub mod inspector;

#[cfg(test)]
mod testing;

pub use blob::{BlobInspector, BlobSummary, InspectError, RecordInfo};
pub use inspector::{EntityInfo, WorldInspector, WorldSummary};
