use crate::world::World;
use keepsake_common::{ByteReader, ByteWriter, CodecError, Handle, OriginKey, PersistentId};
use std::any::Any;

/// Capability every object in the world implements to take part in saves.
///
/// Identity is owned by the [`World`]; an object never stores its own id.
/// The payload format behind `write_state`/`read_state` belongs to the type
/// alone; the save format only frames it.
pub trait Persistable: Any {
    /// Stable name this type is registered under in the [`TypeRegistry`](crate::TypeRegistry).
    fn type_name(&self) -> &'static str;

    /// Map origin key. Objects with a key are matched and mutated in place on
    /// load; objects without one are deleted and recreated.
    fn origin(&self) -> Option<&OriginKey> {
        None
    }

    /// Whether this object is written by the next save.
    fn should_persist(&self) -> bool {
        true
    }

    fn write_state(&self, w: &mut ByteWriter) -> Result<(), CodecError>;

    fn read_state(&mut self, r: &mut ByteReader<'_>) -> Result<(), CodecError>;

    /// First sweep after every record of a load has been applied.
    fn before_loaded(&mut self, _ctx: &LoadContext<'_>) {}

    /// Second sweep. Every object has finished `before_loaded` by now.
    fn after_loaded(&mut self, _ctx: &LoadContext<'_>) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<'a> dyn Persistable + 'a {
    pub fn downcast_ref<T: Persistable>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Persistable>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// A persistable type that can be registered by name and built empty.
pub trait PersistentType: Persistable + Sized {
    const TYPE_NAME: &'static str;

    /// Fresh instance that `read_state` will fill in.
    fn create() -> Self;
}

/// View handed to the load notifications.
///
/// The notified object is detached from `world` for the duration of the call,
/// so it is the only object that cannot be resolved through it.
pub struct LoadContext<'w> {
    pub id: PersistentId,
    pub world: &'w World,
}

impl<'w> LoadContext<'w> {
    pub fn resolve(&self, handle: Handle) -> Option<&'w dyn Persistable> {
        self.world.resolve(handle)
    }

    pub fn resolve_as<T: Persistable>(&self, handle: Handle) -> Option<&'w T> {
        self.world.resolve_as::<T>(handle)
    }
}
