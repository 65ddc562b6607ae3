use keepsake_common::{ByteReader, ByteWriter, CodecError, OriginKey};
use keepsake_kernel::{Persistable, PersistentType};
use std::any::Any;

#[derive(Debug, Default)]
pub struct Marker {
    pub origin: Option<OriginKey>,
    pub value: u32,
    pub transient: bool,
}

impl Marker {
    pub fn placed(key: &str, value: u32) -> Self {
        Self {
            origin: Some(OriginKey::new(key)),
            value,
            transient: false,
        }
    }

    pub fn dynamic(value: u32) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }
}

impl Persistable for Marker {
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

impl PersistentType for Marker {
    const TYPE_NAME: &'static str = "marker";

    fn create() -> Self {
        Self::default()
    }
}
