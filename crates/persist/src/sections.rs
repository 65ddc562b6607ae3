//! Ordered registry of global (non-entity) state writers and readers.
//!
//! The save format has no section tags: the n-th writer's block is read by
//! the n-th reader. Each block is length-prefixed, so a reader that misreads
//! its own block cannot disturb the next one.

use crate::report::SectionFailure;
use keepsake_common::{ByteReader, ByteWriter, CodecError};
use std::cell::RefCell;
use std::rc::Rc;

pub type WriterFn = Box<dyn Fn(&mut ByteWriter) -> Result<(), CodecError>>;
pub type ReaderFn = Box<dyn FnMut(&mut ByteReader<'_>) -> Result<(), CodecError>>;

/// Global state owned by one subsystem, saved as a single block.
pub trait StateSection {
    /// Label used in logs and reports.
    fn name(&self) -> &str;

    fn write_state(&self, w: &mut ByteWriter) -> Result<(), CodecError>;

    fn read_state(&mut self, r: &mut ByteReader<'_>) -> Result<(), CodecError>;
}

struct Entry<F> {
    label: String,
    callback: F,
}

/// Append-only lists of section writers and readers.
#[derive(Default)]
pub struct SectionRegistry {
    writers: Vec<Entry<WriterFn>>,
    readers: Vec<Entry<ReaderFn>>,
}

impl SectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a writer. Its block is read by the reader at the same position.
    pub fn add_writer<F>(&mut self, writer: F)
    where
        F: Fn(&mut ByteWriter) -> Result<(), CodecError> + 'static,
    {
        let label = format!("writer {}", self.writers.len());
        self.writers.push(Entry {
            label,
            callback: Box::new(writer),
        });
    }

    /// Append a reader. It consumes the block of the writer at the same position.
    pub fn add_reader<F>(&mut self, reader: F)
    where
        F: FnMut(&mut ByteReader<'_>) -> Result<(), CodecError> + 'static,
    {
        let label = format!("reader {}", self.readers.len());
        self.readers.push(Entry {
            label,
            callback: Box::new(reader),
        });
    }

    /// Register both halves of `section` at once.
    ///
    /// Only keeps the pair aligned if every earlier writer also has a reader.
    pub fn add_section<S: StateSection + 'static>(&mut self, section: Rc<RefCell<S>>) {
        let label = section.borrow().name().to_owned();
        let writer = Rc::clone(&section);
        self.writers.push(Entry {
            label: label.clone(),
            callback: Box::new(move |w: &mut ByteWriter| writer.borrow().write_state(w)),
        });
        self.readers.push(Entry {
            label,
            callback: Box::new(move |r: &mut ByteReader<'_>| section.borrow_mut().read_state(r)),
        });
    }

    pub fn writer_count(&self) -> usize {
        self.writers.len()
    }

    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    /// Run every writer in registration order, one block each.
    ///
    /// A failing writer still emits an (empty) block so positions stay aligned.
    pub fn save_all(&self, out: &mut ByteWriter) -> Vec<SectionFailure> {
        let mut failures = Vec::new();
        for (index, entry) in self.writers.iter().enumerate() {
            if let Err(error) = out.write_wrapped(|block| (entry.callback)(block)) {
                tracing::error!(section = %entry.label, %error, "section writer failed; empty block written");
                out.write_i32(0);
                failures.push(SectionFailure {
                    index,
                    label: entry.label.clone(),
                    error,
                });
            }
        }
        failures
    }

    /// Run every reader in registration order against its own block.
    ///
    /// Reader errors are logged and returned; only broken framing of the
    /// outer stream is an `Err`.
    pub fn load_all(&mut self, input: &mut ByteReader<'_>) -> Result<Vec<SectionFailure>, CodecError> {
        if self.readers.len() != self.writers.len() {
            tracing::warn!(
                writers = self.writers.len(),
                readers = self.readers.len(),
                "section writers and readers are unbalanced"
            );
        }
        let mut failures = Vec::new();
        for (index, entry) in self.readers.iter_mut().enumerate() {
            let mut block = input.read_block()?;
            match (entry.callback)(&mut block) {
                Ok(()) => {
                    if !block.is_empty() {
                        tracing::debug!(section = %entry.label, unread = block.remaining(), "section left bytes unread");
                    }
                }
                Err(error) => {
                    tracing::error!(section = %entry.label, %error, "section reader failed; block skipped");
                    failures.push(SectionFailure {
                        index,
                        label: entry.label.clone(),
                        error,
                    });
                }
            }
        }
        Ok(failures)
    }
}
