//! A small harbour scene used by the CLI commands.

use glam::{Quat, Vec3};
use keepsake_common::{ByteReader, ByteWriter, CodecError, Handle, OriginKey, Transform};
use keepsake_kernel::{IdError, LoadContext, Persistable, PersistentType, World};
use keepsake_persist::{PersistenceSystem, StateSection};
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

/// Map-placed light. Exists before any load; only its state is saved.
#[derive(Debug, Default)]
pub struct Beacon {
    pub origin: Option<OriginKey>,
    pub transform: Transform,
    pub lit: bool,
}

impl Persistable for Beacon {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn origin(&self) -> Option<&OriginKey> {
        self.origin.as_ref()
    }

    fn write_state(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_transform(&self.transform);
        w.write_bool(self.lit);
        Ok(())
    }

    fn read_state(&mut self, r: &mut ByteReader<'_>) -> Result<(), CodecError> {
        self.transform = r.read_transform()?;
        self.lit = r.read_bool()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl PersistentType for Beacon {
    const TYPE_NAME: &'static str = "beacon";

    fn create() -> Self {
        Self::default()
    }
}

/// Boat that sails toward a beacon.
#[derive(Debug, Default)]
pub struct Courier {
    pub transform: Transform,
    pub cargo: u32,
    pub heading_to: Handle,
    /// Recomputed after load, never saved.
    pub destination: Option<Vec3>,
}

impl Persistable for Courier {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn write_state(&self, w: &mut ByteWriter) -> Result<(), CodecError> {
        w.write_transform(&self.transform);
        w.write_u32(self.cargo);
        w.write_handle(self.heading_to);
        Ok(())
    }

    fn read_state(&mut self, r: &mut ByteReader<'_>) -> Result<(), CodecError> {
        self.transform = r.read_transform()?;
        self.cargo = r.read_u32()?;
        self.heading_to = r.read_handle()?;
        Ok(())
    }

    fn after_loaded(&mut self, ctx: &LoadContext<'_>) {
        self.destination = ctx
            .resolve_as::<Beacon>(self.heading_to)
            .map(|b| b.transform.position);
        if self.destination.is_none() && !self.heading_to.is_none() {
            tracing::warn!(courier = %ctx.id, target = ?self.heading_to, "courier target is gone");
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl PersistentType for Courier {
    const TYPE_NAME: &'static str = "courier";

    fn create() -> Self {
        Self::default()
    }
}

/// Global tide clock saved as a registry section.
#[derive(Debug, Default)]
pub struct TideClock {
    pub tick: u64,
}

impl StateSection for TideClock {
    fn name(&self) -> &str {
        "tide clock"
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

/// Number of registry sections the harbour writes.
pub const SECTIONS: usize = 1;

pub struct Harbour {
    pub world: World,
    pub clock: Rc<RefCell<TideClock>>,
    pub system: PersistenceSystem,
}

impl Harbour {
    /// The map as it stands at startup: `beacons` lit beacons on a line, no couriers.
    pub fn new(beacons: usize) -> Result<Self, IdError> {
        let mut world = World::new();
        world.register::<Beacon>().register::<Courier>();
        for i in 0..beacons {
            world.spawn(Beacon {
                origin: Some(OriginKey::new(format!("beacon_{i}"))),
                transform: Transform {
                    position: Vec3::new(i as f32 * 10.0, 0.0, 0.0),
                    ..Transform::default()
                },
                lit: true,
            })?;
        }

        let clock = Rc::new(RefCell::new(TideClock::default()));
        let mut system = PersistenceSystem::new();
        system.add_section(Rc::clone(&clock));
        Ok(Self {
            world,
            clock,
            system,
        })
    }

    /// Launch `count` couriers, each heading for a beacon.
    pub fn launch(&mut self, count: usize) -> Result<(), IdError> {
        let beacons: Vec<_> = self
            .world
            .iter()
            .filter(|(_, e)| e.downcast_ref::<Beacon>().is_some())
            .map(|(id, _)| id)
            .collect();
        for i in 0..count {
            let heading_to = beacons
                .get(i % beacons.len().max(1))
                .map(|&id| Handle::to(id))
                .unwrap_or_default();
            self.world.spawn(Courier {
                cargo: 10 + i as u32,
                heading_to,
                ..Courier::default()
            })?;
        }
        Ok(())
    }

    /// Advance the tide clock and sail every courier one step toward its beacon.
    pub fn step(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.clock.borrow_mut().tick += 1;
            for id in self.world.entity_ids() {
                let Some(target) = self
                    .world
                    .get_as::<Courier>(id)
                    .and_then(|c| self.world.resolve_as::<Beacon>(c.heading_to))
                    .map(|b| b.transform.position)
                else {
                    continue;
                };
                if let Some(courier) = self.world.get_as_mut::<Courier>(id) {
                    let to_target = target - courier.transform.position;
                    courier.transform.position += to_target.clamp_length_max(1.0);
                    if to_target.length_squared() > f32::EPSILON {
                        courier.transform.rotation = Quat::from_rotation_arc(Vec3::X, to_target.normalize());
                    }
                }
            }
        }
        // The first beacon is lit five ticks out of ten.
        let tick = self.clock.borrow().tick;
        if let Some(id) = self.world.entity_ids().first().copied() {
            if let Some(beacon) = self.world.get_as_mut::<Beacon>(id) {
                beacon.lit = tick % 10 < 5;
            }
        }
    }
}
