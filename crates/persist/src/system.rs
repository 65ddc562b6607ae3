//! The save/load orchestrator.
//!
//! Blob layout:
//! ```text
//! [session id: string][section blocks, registration order][record count: i32][records][watermark: u64]
//! ```

use crate::entities;
use crate::report::{LoadReport, SaveReport};
use crate::sections::{SectionRegistry, StateSection};
use crate::store::{SaveRequest, SaveStore, StoreError};
use keepsake_common::{ByteReader, ByteWriter, CodecError};
use keepsake_kernel::World;
use std::cell::RefCell;
use std::rc::Rc;
use uuid::Uuid;

/// Display name used when no save has been loaded or named yet.
pub const DEFAULT_DISPLAY_NAME: &str = "Untitled";

/// Where a save or load cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Idle,
    Saving,
    RegistryReading,
    EntitiesPreclearing,
    EntitiesResolving,
    EntitiesDeserializing,
    BeforeLoadedSweep,
    AfterLoadedSweep,
}

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("another persistence cycle is in progress ({0:?})")]
    Busy(LoadPhase),
    #[error("save could not be encoded: {0}")]
    Encode(#[from] CodecError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("another persistence cycle is in progress ({0:?})")]
    Busy(LoadPhase),
    #[error("save header unreadable: {0}")]
    Header(#[source] CodecError),
    #[error("registry sections unreadable: {0}")]
    Sections(#[source] CodecError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Owns everything a save/load cycle shares: the section registry, the
/// session id and the current phase.
///
/// Construct once at startup, register sections, then drive saves and loads
/// from a single control point. Methods take `&mut self`, so two cycles
/// cannot overlap. A cycle cut short by a panicking callback leaves the
/// phase where it stopped and every later call is refused with `Busy`
/// until the host calls [`PersistenceSystem::reset`].
pub struct PersistenceSystem {
    sections: SectionRegistry,
    session_id: Option<String>,
    display_name: Option<String>,
    phase: LoadPhase,
}

impl Default for PersistenceSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceSystem {
    pub fn new() -> Self {
        Self {
            sections: SectionRegistry::new(),
            session_id: None,
            display_name: None,
            phase: LoadPhase::Idle,
        }
    }

    pub fn sections(&self) -> &SectionRegistry {
        &self.sections
    }

    pub fn add_writer<F>(&mut self, writer: F)
    where
        F: Fn(&mut ByteWriter) -> Result<(), CodecError> + 'static,
    {
        self.sections.add_writer(writer);
    }

    pub fn add_reader<F>(&mut self, reader: F)
    where
        F: FnMut(&mut ByteReader<'_>) -> Result<(), CodecError> + 'static,
    {
        self.sections.add_reader(reader);
    }

    pub fn add_section<S: StateSection + 'static>(&mut self, section: Rc<RefCell<S>>) {
        self.sections.add_section(section);
    }

    /// Session id written at the head of every save; set by the first save
    /// or adopted from the last load.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(DEFAULT_DISPLAY_NAME)
    }

    pub fn set_display_name(&mut self, name: impl Into<String>) {
        self.display_name = Some(name.into());
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    /// Return to `Idle` after a cycle was abandoned by a panic.
    ///
    /// Nothing is rolled back. A load cut short may have cleared dynamic
    /// objects, detached map objects or run only part of a sweep, so the host
    /// should rebuild or reload its world before trusting it again. Calling
    /// this while idle does nothing.
    pub fn reset(&mut self) {
        if self.phase != LoadPhase::Idle {
            tracing::warn!(phase = ?self.phase, "persistence cycle abandoned; phase reset");
            self.phase = LoadPhase::Idle;
        }
    }

    fn begin(&mut self, phase: LoadPhase) -> Result<(), LoadPhase> {
        if self.phase != LoadPhase::Idle {
            return Err(self.phase);
        }
        self.phase = phase;
        Ok(())
    }

    /// Encode the whole state into a fresh blob.
    pub fn encode(&mut self, world: &World) -> Result<(Vec<u8>, SaveReport), SaveError> {
        self.begin(LoadPhase::Saving).map_err(SaveError::Busy)?;
        let result = self.encode_inner(world);
        self.phase = LoadPhase::Idle;
        result
    }

    fn encode_inner(&mut self, world: &World) -> Result<(Vec<u8>, SaveReport), SaveError> {
        let _span = tracing::info_span!("save", entities = world.entity_count()).entered();

        let session_id = self
            .session_id
            .get_or_insert_with(|| Uuid::new_v4().simple().to_string())
            .clone();

        let mut out = ByteWriter::new();
        out.write_string(&session_id);
        let section_failures = self.sections.save_all(&mut out);
        let stats = entities::write_entities(world, &mut out)?;
        let watermark = world.ids().watermark();
        out.write_u64(watermark);

        let report = SaveReport {
            session_id,
            display_name: self.display_name().to_owned(),
            sections: self.sections.writer_count(),
            section_failures: section_failures.len(),
            records: stats.records,
            excluded: stats.excluded,
            unwritable: stats.unwritable,
            watermark,
            bytes: out.len(),
        };
        tracing::info!(records = report.records, bytes = report.bytes, "state encoded");
        Ok((out.into_bytes(), report))
    }

    /// Encode the state and hand it to `store` under `slot`.
    pub fn save(
        &mut self,
        world: &World,
        store: &mut dyn SaveStore,
        slot: &str,
    ) -> Result<SaveReport, SaveError> {
        let (data, report) = self.encode(world)?;
        store.write(SaveRequest {
            slot: slot.to_owned(),
            display_name: report.display_name.clone(),
            data,
        })?;
        tracing::info!(slot, display_name = %report.display_name, "game saved");
        Ok(report)
    }

    /// Restore state from a blob.
    ///
    /// Record and section problems are recovered and listed in the report.
    /// Only an unreadable header or broken section framing fails the call.
    pub fn decode(&mut self, world: &mut World, blob: &[u8]) -> Result<LoadReport, LoadError> {
        self.begin(LoadPhase::RegistryReading).map_err(LoadError::Busy)?;
        let result = self.decode_inner(world, blob);
        self.phase = LoadPhase::Idle;
        result
    }

    fn decode_inner(&mut self, world: &mut World, blob: &[u8]) -> Result<LoadReport, LoadError> {
        let _span = tracing::info_span!("load", bytes = blob.len()).entered();
        let mut input = ByteReader::new(blob);
        let mut report = LoadReport::default();

        let session_id = input.read_string().map_err(LoadError::Header)?;
        report.sections = self.sections.reader_count();
        report.section_failures = self
            .sections
            .load_all(&mut input)
            .map_err(LoadError::Sections)?;
        self.session_id = Some(session_id.clone());
        report.session_id = session_id;

        self.phase = LoadPhase::EntitiesPreclearing;
        report.precleared = world.despawn_where(|e| e.origin().is_none()).len();
        tracing::debug!(precleared = report.precleared, "dynamic objects cleared");

        self.phase = LoadPhase::EntitiesResolving;
        let decoded = entities::decode_records(&mut input);
        report.declared_records = decoded.declared;
        report.truncated = decoded.truncated;
        let associations = entities::resolve(world, decoded.records, &mut report.records);

        if !report.truncated {
            match input.read_u64() {
                Ok(watermark) => match world.restore_watermark(watermark) {
                    Ok(()) => report.watermark = Some(watermark),
                    Err(error) => tracing::error!(%error, "identity watermark rejected"),
                },
                Err(error) => {
                    tracing::error!(%error, "identity watermark missing");
                    report.truncated = true;
                }
            }
            if !input.is_empty() {
                tracing::debug!(unread = input.remaining(), "trailing bytes after watermark");
            }
        }

        self.phase = LoadPhase::EntitiesDeserializing;
        entities::deserialize_into(world, associations, &mut report);
        report.records.sort_by_key(|o| o.index);

        self.phase = LoadPhase::BeforeLoadedSweep;
        entities::sweep_before_loaded(world);
        self.phase = LoadPhase::AfterLoadedSweep;
        entities::sweep_after_loaded(world);

        tracing::info!(
            restored = report.restored(),
            skipped = report.skipped().count(),
            truncated = report.truncated,
            "state restored"
        );
        Ok(report)
    }

    /// Fetch `slot` from `store` and restore it.
    pub fn load(
        &mut self,
        world: &mut World,
        store: &dyn SaveStore,
        slot: &str,
    ) -> Result<LoadReport, LoadError> {
        if self.phase != LoadPhase::Idle {
            return Err(LoadError::Busy(self.phase));
        }
        let saved = store.read(slot)?;
        let report = self.decode(world, &saved.data)?;
        self.display_name = Some(saved.display_name);
        tracing::info!(slot, display_name = self.display_name(), "game loaded");
        Ok(report)
    }
}
