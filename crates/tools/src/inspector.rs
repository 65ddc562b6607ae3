use keepsake_common::{ByteWriter, OriginKey, PersistentId};
use keepsake_kernel::World;

/// World inspector for developer tooling.
///
/// Read-only queries against the live object set, for debugging and for
/// checking a world before and after a save/load cycle.
pub struct WorldInspector;

impl WorldInspector {
    /// Produce a summary of the world state.
    pub fn summary(world: &World) -> WorldSummary {
        let mut summary = WorldSummary {
            entity_count: world.entity_count(),
            map_objects: 0,
            transient: 0,
            watermark: world.ids().watermark(),
            state_hash: world.state_hash(),
        };
        for (_, entity) in world.iter() {
            if entity.origin().is_some() {
                summary.map_objects += 1;
            }
            if !entity.should_persist() {
                summary.transient += 1;
            }
        }
        summary
    }

    /// Describe one object, including how large its saved state would be.
    pub fn inspect_entity(world: &World, id: PersistentId) -> Option<EntityInfo> {
        world.get(id).map(|entity| {
            let mut state = ByteWriter::new();
            let state_bytes = entity.write_state(&mut state).ok().map(|()| state.len());
            EntityInfo {
                id,
                type_name: entity.type_name(),
                origin: entity.origin().cloned(),
                persisted: entity.should_persist(),
                state_bytes,
            }
        })
    }

    /// List all ids in the world, ascending.
    pub fn list_entities(world: &World) -> Vec<PersistentId> {
        world.entity_ids()
    }
}

/// Summary of world state for the inspector.
#[derive(Debug, Clone)]
pub struct WorldSummary {
    pub entity_count: usize,
    pub map_objects: usize,
    pub transient: usize,
    pub watermark: u64,
    pub state_hash: u64,
}

impl std::fmt::Display for WorldSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "World: entities={} map={} transient={} watermark={} hash={:#018x}",
            self.entity_count, self.map_objects, self.transient, self.watermark, self.state_hash
        )
    }
}

/// Detailed info about a single object.
#[derive(Debug, Clone)]
pub struct EntityInfo {
    pub id: PersistentId,
    pub type_name: &'static str,
    pub origin: Option<OriginKey>,
    pub persisted: bool,
    /// `None` when the object's state cannot currently be written.
    pub state_bytes: Option<usize>,
}

impl std::fmt::Display for EntityInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity {} type={}", self.id, self.type_name)?;
        if let Some(origin) = &self.origin {
            write!(f, " origin={origin}")?;
        }
        match self.state_bytes {
            Some(bytes) => write!(f, " state={bytes}B")?,
            None => write!(f, " state=unwritable")?,
        }
        if !self.persisted {
            write!(f, " (transient)")?;
        }
        Ok(())
    }
}
