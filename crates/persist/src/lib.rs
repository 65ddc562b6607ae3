//! Save and reload a live object graph.
//!
//! A save is one opaque blob: a session id, the global sections in
//! registration order, one record per persisted object and the id watermark.
//! Loading reconciles that blob against the live [`World`](keepsake_kernel::World):
//! map objects are matched by origin key and updated in place, every other
//! object is rebuilt from its type name.
//!
//! # Invariants
//! - Ids issued after a load are above every id that existed at save time.
//! - A bad record or section costs only itself.
//! - No `after_loaded` runs before every object has had `before_loaded`.

pub mod entities;
pub mod report;
pub mod sections;
pub mod store;
pub mod system;

#[cfg(test)]
mod testing;

pub use entities::EntityRecord;
pub use report::{
    LoadReport, RecordOutcome, RecordStatus, Rekey, SaveReport, SectionFailure, SkipReason,
};
pub use sections::{SectionRegistry, StateSection};
pub use store::{FileStore, MemoryStore, SaveMeta, SaveRequest, SaveStore, SavedBlob, StoreError};
pub use system::{DEFAULT_DISPLAY_NAME, LoadError, LoadPhase, PersistenceSystem, SaveError};
