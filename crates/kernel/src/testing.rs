//! Small persistable types shared by the kernel's unit tests.

use crate::entity::{Persistable, PersistentType};
use keepsake_common::{ByteReader, ByteWriter, CodecError, Handle, OriginKey};
use std::any::Any;

#[derive(Debug, Default)]
pub struct Counter {
    pub value: u32,
    pub origin: Option<OriginKey>,
    pub transient: bool,
}

impl Counter {
    pub fn with_value(value: u32) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    pub fn placed(key: &str, value: u32) -> Self {
        Self {
            value,
            origin: Some(OriginKey::new(key)),
            transient: false,
        }
    }
}

impl Persistable for Counter {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn origin(&self) -> Option<&OriginKey> {
        self.origin.as_ref()
    }

    fn should_persist(&self) -> bool {
        !self.transient
    }

    fn write_state(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_u32(self.value);
        Ok(())
    }

    fn read_state(&mut self, r: &mut ByteReader<'_>) -> Result<(), CodecError> {
        self.value = r.read_u32()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl PersistentType for Counter {
    const TYPE_NAME: &'static str = "counter";

    fn create() -> Self {
        Self::default()
    }
}

#[derive(Debug, Default)]
pub struct Pointer {
    pub target: Handle,
    pub seen: Option<u32>,
}

impl Persistable for Pointer {
    fn type_name(&self) -> &'static str {
        "pointer"
    }

    fn write_state(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_handle(self.target);
        Ok(())
    }

    fn read_state(&mut self, r: &mut ByteReader<'_>) -> Result<(), CodecError> {
        self.target = r.read_handle()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
