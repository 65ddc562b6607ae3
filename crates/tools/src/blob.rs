//! Structural view of a save blob, without a world to load it into.
//!
//! Sections carry no tags, so the caller says how many there are.

use keepsake_common::{ByteReader, CodecError, OriginKey, PersistentId};
use keepsake_persist::EntityRecord;
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("session id unreadable: {0}")]
    Header(#[source] CodecError),
    #[error("section {index} framing broken: {source}")]
    Section {
        index: usize,
        #[source]
        source: CodecError,
    },
}

/// One entity record as found in a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordInfo {
    pub index: usize,
    pub type_name: String,
    pub origin: Option<OriginKey>,
    pub payload_bytes: usize,
    /// `None` when the payload is too short to hold an id.
    pub saved_id: Option<PersistentId>,
}

impl fmt::Display for RecordInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.index, self.type_name)?;
        match self.saved_id {
            Some(id) => write!(f, " {id}")?,
            None => write!(f, " <no id>")?,
        }
        if let Some(origin) = &self.origin {
            write!(f, " origin={origin}")?;
        }
        write!(f, " payload={}B", self.payload_bytes)
    }
}

#[derive(Debug, Clone, Default)]
pub struct BlobSummary {
    pub session_id: String,
    /// Byte length of each section block, in order.
    pub section_bytes: Vec<usize>,
    pub declared_records: usize,
    pub records: Vec<RecordInfo>,
    pub watermark: Option<u64>,
    /// Records or watermark could not all be framed.
    pub truncated: bool,
    /// Bytes left after the watermark.
    pub trailing_bytes: usize,
}

impl BlobSummary {
    pub fn map_records(&self) -> usize {
        self.records.iter().filter(|r| r.origin.is_some()).count()
    }
}

impl fmt::Display for BlobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Blob: session={} sections={} records={}/{} map={}",
            self.session_id,
            self.section_bytes.len(),
            self.records.len(),
            self.declared_records,
            self.map_records(),
        )?;
        match self.watermark {
            Some(w) => write!(f, " watermark={w}")?,
            None => write!(f, " watermark=missing")?,
        }
        if self.truncated {
            write!(f, " truncated")?;
        }
        Ok(())
    }
}

pub struct BlobInspector;

impl BlobInspector {
    /// Walk the framing of `blob`. Only a broken header or section frame is
    /// an error; a damaged entity section is reported as truncated.
    pub fn inspect(blob: &[u8], sections: usize) -> Result<BlobSummary, InspectError> {
        let mut input = ByteReader::new(blob);
        let mut summary = BlobSummary {
            session_id: input.read_string().map_err(InspectError::Header)?,
            ..BlobSummary::default()
        };

        for index in 0..sections {
            let block = input
                .read_block()
                .map_err(|source| InspectError::Section { index, source })?;
            summary.section_bytes.push(block.remaining());
        }

        match input.read_i32() {
            Ok(count) if count >= 0 => summary.declared_records = count as usize,
            Ok(_) | Err(_) => {
                summary.truncated = true;
                return Ok(summary);
            }
        }

        for index in 0..summary.declared_records {
            match EntityRecord::decode(&mut input) {
                Ok(record) => summary.records.push(RecordInfo {
                    index,
                    saved_id: record.saved_id().ok(),
                    payload_bytes: record.payload.len(),
                    type_name: record.type_name,
                    origin: record.origin,
                }),
                Err(error) => {
                    tracing::debug!(record = index, %error, "record framing broken");
                    summary.truncated = true;
                    return Ok(summary);
                }
            }
        }

        match input.read_u64() {
            Ok(watermark) => summary.watermark = Some(watermark),
            Err(_) => summary.truncated = true,
        }
        summary.trailing_bytes = input.remaining();
        Ok(summary)
    }
}
