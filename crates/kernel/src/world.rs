use crate::entity::{Persistable, PersistentType};
use crate::ids::{IdAllocator, IdError, MAX_ID};
use crate::registry::TypeRegistry;
use keepsake_common::{ByteWriter, Handle, OriginKey, PersistentId};
use std::collections::BTreeMap;
use std::fmt;

/// The live set of persistable objects.
///
/// Owns every object, the id allocator that names them and the type table
/// used to rebuild them from a save. Uses BTreeMap so enumeration is in
/// ascending id order on every platform.
#[derive(Default)]
pub struct World {
    entities: BTreeMap<PersistentId, Box<dyn Persistable>>,
    ids: IdAllocator,
    types: TypeRegistry,
}

impl World {
    /// Create an empty world with no registered types.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty world that rebuilds objects through `types`.
    pub fn with_types(types: TypeRegistry) -> Self {
        Self {
            types,
            ..Default::default()
        }
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    /// Register `T` with this world's type table.
    pub fn register<T: PersistentType>(&mut self) -> &mut Self {
        self.types.register::<T>();
        self
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    /// Issue a fresh id without spawning anything.
    pub fn generate_id(&mut self) -> Result<PersistentId, IdError> {
        self.ids.generate()
    }

    /// Adopt the watermark read from a save. Never lowers it.
    pub fn restore_watermark(&mut self, saved: u64) -> Result<(), IdError> {
        self.ids.restore(saved)
    }

    /// Number of live objects.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Add an object under a freshly generated id.
    pub fn spawn<T: Persistable>(&mut self, entity: T) -> Result<PersistentId, IdError> {
        self.spawn_boxed(Box::new(entity))
    }

    /// Never replaces a live object, even if the watermark was tampered with.
    pub fn spawn_boxed(&mut self, entity: Box<dyn Persistable>) -> Result<PersistentId, IdError> {
        let id = self.ids.generate()?;
        if self.entities.contains_key(&id) {
            return Err(IdError::Taken(id));
        }
        tracing::trace!(%id, type_name = entity.type_name(), "spawned");
        self.entities.insert(id, entity);
        Ok(id)
    }

    /// Add an object under a specific id (used by restore).
    ///
    /// Hands the object back if the id is 0, above `MAX_ID` or already taken.
    pub fn insert_with_id(
        &mut self,
        id: PersistentId,
        entity: Box<dyn Persistable>,
    ) -> Result<(), Box<dyn Persistable>> {
        if id.0 == 0 || id.0 > MAX_ID || self.entities.contains_key(&id) {
            return Err(entity);
        }
        if self.ids.observe(id).is_err() {
            return Err(entity);
        }
        self.entities.insert(id, entity);
        Ok(())
    }

    /// Move a live object to a freshly generated id. Returns the new id.
    ///
    /// The object is left where it was if no id can be issued.
    pub fn rekey(&mut self, id: PersistentId) -> Result<Option<PersistentId>, IdError> {
        if !self.entities.contains_key(&id) {
            return Ok(None);
        }
        let to = self.ids.generate()?;
        if self.entities.contains_key(&to) {
            return Err(IdError::Taken(to));
        }
        if let Some(entity) = self.entities.remove(&id) {
            tracing::trace!(from = %id, %to, type_name = entity.type_name(), "rekeyed");
            self.entities.insert(to, entity);
        }
        Ok(Some(to))
    }

    pub fn contains(&self, id: PersistentId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Remove an object. Returns it if it existed.
    pub fn despawn(&mut self, id: PersistentId) -> Option<Box<dyn Persistable>> {
        let removed = self.entities.remove(&id);
        if let Some(ref e) = removed {
            tracing::trace!(%id, type_name = e.type_name(), "despawned");
        }
        removed
    }

    /// Remove every object matching `predicate`. Returns the removed ids.
    pub fn despawn_where<F>(&mut self, mut predicate: F) -> Vec<PersistentId>
    where
        F: FnMut(&dyn Persistable) -> bool,
    {
        let doomed: Vec<PersistentId> = self
            .entities
            .iter()
            .filter_map(|(id, e)| predicate(&**e).then_some(*id))
            .collect();
        for id in &doomed {
            self.entities.remove(id);
        }
        doomed
    }

    pub fn get(&self, id: PersistentId) -> Option<&dyn Persistable> {
        self.entities.get(&id).map(|e| &**e)
    }

    pub fn get_mut(&mut self, id: PersistentId) -> Option<&mut (dyn Persistable + 'static)> {
        self.entities.get_mut(&id).map(|e| &mut **e)
    }

    pub fn get_as<T: Persistable>(&self, id: PersistentId) -> Option<&T> {
        self.get(id).and_then(|e| e.downcast_ref::<T>())
    }

    pub fn get_as_mut<T: Persistable>(&mut self, id: PersistentId) -> Option<&mut T> {
        self.entities
            .get_mut(&id)
            .and_then(|e| e.as_any_mut().downcast_mut::<T>())
    }

    /// Follow a handle. Dangling handles resolve to `None`.
    pub fn resolve(&self, handle: Handle) -> Option<&dyn Persistable> {
        if handle.is_none() {
            return None;
        }
        self.get(handle.id())
    }

    pub fn resolve_as<T: Persistable>(&self, handle: Handle) -> Option<&T> {
        self.resolve(handle).and_then(|e| e.downcast_ref::<T>())
    }

    /// Live objects in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (PersistentId, &dyn Persistable)> {
        self.entities.iter().map(|(id, e)| (*id, &**e))
    }

    /// Materialised list of live ids, safe to hold across mutation.
    pub fn entity_ids(&self) -> Vec<PersistentId> {
        self.entities.keys().copied().collect()
    }

    /// Find the live object placed by the map under `key`.
    pub fn find_by_origin(&self, key: &OriginKey) -> Option<PersistentId> {
        self.entities
            .iter()
            .find(|(_, e)| e.origin() == Some(key))
            .map(|(id, _)| *id)
    }

    /// Take an object out, run `f` on it with shared access to everything
    /// else, then put it back under the same id.
    pub fn with_detached<R, F>(&mut self, id: PersistentId, f: F) -> Option<R>
    where
        F: FnOnce(&mut dyn Persistable, &World) -> R,
    {
        let mut entity = self.entities.remove(&id)?;
        let result = f(&mut *entity, self);
        self.entities.insert(id, entity);
        Some(result)
    }

    /// Compute a deterministic hash of every persisted object's state.
    ///
    /// Covers id, type name, origin and encoded payload of each object whose
    /// `should_persist` is true, in canonical id order.
    pub fn state_hash(&self) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325; // FNV offset basis
        let mix = |h: &mut u64, bytes: &[u8]| {
            for &b in bytes {
                *h ^= b as u64;
                *h = h.wrapping_mul(0x0100_0000_01b3);
            }
        };
        for (id, entity) in &self.entities {
            if !entity.should_persist() {
                continue;
            }
            mix(&mut h, &id.0.to_le_bytes());
            mix(&mut h, entity.type_name().as_bytes());
            if let Some(origin) = entity.origin() {
                mix(&mut h, origin.as_str().as_bytes());
            }
            let mut state = ByteWriter::new();
            match entity.write_state(&mut state) {
                Ok(()) => mix(&mut h, state.as_bytes()),
                Err(_) => mix(&mut h, b"<unwritable>"),
            }
        }
        h
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("watermark", &self.ids.watermark())
            .field(
                "entities",
                &self
                    .entities
                    .iter()
                    .map(|(id, e)| (id.0, e.type_name()))
                    .collect::<Vec<_>>(),
            )
            .field("types", &self.types)
            .finish()
    }
}
