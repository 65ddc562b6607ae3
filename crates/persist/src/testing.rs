//! Object types and sections shared by the persistence tests.

use crate::entities::EntityRecord;
use crate::sections::StateSection;
use keepsake_common::{ByteReader, ByteWriter, CodecError, Handle, OriginKey, PersistentId};
use keepsake_kernel::{LoadContext, Persistable, PersistentType, TypeRegistry, World};
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// A map-placed object. Never rebuilt by a load, only updated.
#[derive(Debug)]
pub struct Prop {
    pub origin: Option<OriginKey>,
    pub health: u32,
    /// Not saved; tells apart two objects with equal state.
    pub instance: u64,
    /// Writes a state its own reader rejects.
    pub corrupt: bool,
}

impl Prop {
    pub fn placed(key: &str) -> Self {
        Self {
            origin: Some(OriginKey::new(key)),
            ..Self::create()
        }
    }
}

impl Persistable for Prop {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn origin(&self) -> Option<&OriginKey> {
        self.origin.as_ref()
    }

    fn write_state(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_u32(self.health);
        w.write_u8(if self.corrupt { 7 } else { 1 });
        Ok(())
    }

    fn read_state(&mut self, r: &mut ByteReader<'_>) -> Result<(), CodecError> {
        let health = r.read_u32()?;
        r.read_bool()?;
        self.health = health;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl PersistentType for Prop {
    const TYPE_NAME: &'static str = "prop";

    fn create() -> Self {
        Self {
            origin: None,
            health: 100,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            corrupt: false,
        }
    }
}

/// A dynamic object that refers to others by handle.
#[derive(Debug, Default)]
pub struct Walker {
    pub name: String,
    pub steps: u32,
    pub target: Handle,
    pub post: Handle,
    pub transient: bool,
    /// Set by `before_loaded`.
    pub ready: bool,
    /// What `after_loaded` saw of the target's `ready` flag.
    pub target_ready: Option<bool>,
    /// Health of the post prop as seen by `after_loaded`.
    pub post_health: Option<u32>,
}

impl Walker {
    pub fn named(name: &str, steps: u32) -> Self {
        Self {
            name: name.to_owned(),
            steps,
            ..Self::default()
        }
    }
}

impl Persistable for Walker {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn should_persist(&self) -> bool {
        !self.transient
    }

    fn write_state(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_string(&self.name);
        w.write_wrapped(|route| {
            route.write_u32(self.steps);
            route.write_handle(self.target);
            route.write_handle(self.post);
            Ok(())
        })
    }

    fn read_state(&mut self, r: &mut ByteReader<'_>) -> Result<(), CodecError> {
        self.name = r.read_string()?;
        let route = r.read_wrapped(|route| Ok((route.read_u32()?, route.read_handle()?, route.read_handle()?)))?;
        if let Some((steps, target, post)) = route {
            self.steps = steps;
            self.target = target;
            self.post = post;
        }
        Ok(())
    }

    fn before_loaded(&mut self, _ctx: &LoadContext<'_>) {
        self.ready = true;
    }

    fn after_loaded(&mut self, ctx: &LoadContext<'_>) {
        self.target_ready = ctx.resolve_as::<Walker>(self.target).map(|w| w.ready);
        self.post_health = ctx.resolve_as::<Prop>(self.post).map(|p| p.health);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl PersistentType for Walker {
    const TYPE_NAME: &'static str = "walker";

    fn create() -> Self {
        Self::default()
    }
}

/// Saves fine; refuses to load when `fail_on_read` was saved as set.
#[derive(Debug, Default)]
pub struct Fragile {
    pub fail_on_read: bool,
}

impl Persistable for Fragile {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn write_state(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_bool(self.fail_on_read);
        Ok(())
    }

    fn read_state(&mut self, r: &mut ByteReader<'_>) -> Result<(), CodecError> {
        if r.read_bool()? {
            return Err(CodecError::invalid("fragile state refused"));
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl PersistentType for Fragile {
    const TYPE_NAME: &'static str = "fragile";

    fn create() -> Self {
        Self::default()
    }
}

#[derive(Debug, Default)]
pub struct Clock {
    pub tick: u64,
}

impl StateSection for Clock {
    fn name(&self) -> &str {
        "clock"
    }

    fn write_state(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_u64(self.tick);
        Ok(())
    }

    fn read_state(&mut self, r: &mut ByteReader<'_>) -> Result<(), CodecError> {
        self.tick = r.read_u64()?;
        Ok(())
    }
}

pub fn types() -> TypeRegistry {
    let mut types = TypeRegistry::new();
    types.register::<Prop>();
    types.register::<Walker>();
    types.register::<Fragile>();
    types
}

/// A world with one prop placed per key, in order.
pub fn map_world(keys: &[&str]) -> World {
    let mut world = World::with_types(types());
    for key in keys {
        world.spawn(Prop::placed(key)).unwrap();
    }
    world
}

/// A save with no sections, built record by record so the saved ids and the
/// watermark can be anything, including values `encode` never writes.
pub fn hand_built_blob(records: &[(u64, &dyn Persistable)], watermark: u64) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_string("hand-built");
    w.write_i32(records.len() as i32);
    for (id, entity) in records {
        let mut payload = ByteWriter::new();
        payload.write_id(PersistentId(*id));
        entity.write_state(&mut payload).unwrap();
        EntityRecord {
            type_name: entity.type_name().to_owned(),
            payload: payload.as_bytes(),
            origin: entity.origin().cloned(),
        }
        .encode(&mut w)
        .unwrap();
    }
    w.write_u64(watermark);
    w.into_bytes()
}
