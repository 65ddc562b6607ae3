use keepsake_common::{CodecError, OriginKey, PersistentId};
use std::fmt;

/// Why a single entity record was left out of a load.
#[derive(Debug, thiserror::Error)]
pub enum SkipReason {
    #[error("type `{0}` is not registered")]
    UnknownType(String),
    #[error("no live object has origin key `{0}`")]
    UnmatchedOrigin(OriginKey),
    #[error("origin key `{0}` was already matched by an earlier record")]
    DuplicateOrigin(OriginKey),
    #[error("payload could not be applied: {0}")]
    MalformedPayload(#[source] CodecError),
    #[error("no persistent id could be issued for saved id {0}")]
    NoFreeId(PersistentId),
}

/// What happened to one record.
#[derive(Debug)]
pub enum RecordStatus {
    /// Applied to a map object that was already live.
    Matched(PersistentId),
    /// Applied to a freshly constructed object.
    Created(PersistentId),
    Skipped(SkipReason),
}

#[derive(Debug)]
pub struct RecordOutcome {
    /// Position of the record in the save.
    pub index: usize,
    pub type_name: String,
    pub status: RecordStatus,
}

impl RecordOutcome {
    pub fn id(&self) -> Option<PersistentId> {
        match self.status {
            RecordStatus::Matched(id) | RecordStatus::Created(id) => Some(id),
            RecordStatus::Skipped(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match &self.status {
            RecordStatus::Skipped(reason) => Some(reason),
            _ => None,
        }
    }
}

/// An object that ended the load under a different id than the one it had
/// or asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rekey {
    pub type_name: String,
    pub from: PersistentId,
    pub to: PersistentId,
    /// Record that asked for `from`. `None` for a live object moved off a
    /// saved id it did not own.
    pub record: Option<usize>,
}

impl fmt::Display for Rekey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.record {
            Some(index) => write!(f, "record {index} ({}) {} -> {}", self.type_name, self.from, self.to),
            None => write!(f, "live {} moved {} -> {}", self.type_name, self.from, self.to),
        }
    }
}

/// A registry section whose reader or writer failed.
#[derive(Debug)]
pub struct SectionFailure {
    pub index: usize,
    pub label: String,
    pub error: CodecError,
}

/// Per-item results of one load.
///
/// A load that returns a report has always run to completion; every problem
/// it recovered from is listed here.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Session id read from the save.
    pub session_id: String,
    /// Registry readers that ran.
    pub sections: usize,
    pub section_failures: Vec<SectionFailure>,
    /// Dynamic objects deleted before records were applied.
    pub precleared: usize,
    /// Record count declared by the save.
    pub declared_records: usize,
    /// One entry per decoded record, in save order.
    pub records: Vec<RecordOutcome>,
    /// The entity section ended early; records after the break were lost.
    pub truncated: bool,
    /// Watermark read from the save, if it was reachable and in range.
    pub watermark: Option<u64>,
    /// Objects placed under an id other than their saved one.
    pub rekeyed: Vec<Rekey>,
}

impl LoadReport {
    pub fn matched(&self) -> usize {
        self.records
            .iter()
            .filter(|o| matches!(o.status, RecordStatus::Matched(_)))
            .count()
    }

    pub fn created(&self) -> usize {
        self.records
            .iter()
            .filter(|o| matches!(o.status, RecordStatus::Created(_)))
            .count()
    }

    pub fn restored(&self) -> usize {
        self.matched() + self.created()
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&RecordOutcome, &SkipReason)> {
        self.records
            .iter()
            .filter_map(|o| o.skip_reason().map(|reason| (o, reason)))
    }

    /// No record skipped, no section failed, nothing truncated or re-keyed,
    /// and the watermark was adopted.
    pub fn is_clean(&self) -> bool {
        !self.truncated
            && self.watermark.is_some()
            && self.section_failures.is_empty()
            && self.rekeyed.is_empty()
            && self.skipped().next().is_none()
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Load: session={} sections={} (failed {}) records={} matched={} created={} skipped={} precleared={}",
            self.session_id,
            self.sections,
            self.section_failures.len(),
            self.declared_records,
            self.matched(),
            self.created(),
            self.skipped().count(),
            self.precleared,
        )?;
        if !self.rekeyed.is_empty() {
            write!(f, " rekeyed={}", self.rekeyed.len())?;
        }
        if self.truncated {
            write!(f, " truncated")?;
        }
        Ok(())
    }
}

/// Summary of one save.
#[derive(Debug, Clone, Default)]
pub struct SaveReport {
    pub session_id: String,
    pub display_name: String,
    pub sections: usize,
    pub section_failures: usize,
    pub records: usize,
    /// Live objects that opted out through `should_persist`.
    pub excluded: usize,
    /// Objects whose `write_state` failed and were left out.
    pub unwritable: usize,
    pub watermark: u64,
    pub bytes: usize,
}

impl fmt::Display for SaveReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Save: \"{}\" session={} sections={} records={} excluded={} unwritable={} watermark={} bytes={}",
            self.display_name,
            self.session_id,
            self.sections,
            self.records,
            self.excluded,
            self.unwritable,
            self.watermark,
            self.bytes,
        )
    }
}
