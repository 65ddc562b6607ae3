use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric runtime identity of a persistable object.
///
/// Issued by the world's id allocator and carried across save/load so that
/// handles stored inside other objects keep pointing at the same object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PersistentId(pub u64);

impl PersistentId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PersistentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Weak reference to another persistable object.
///
/// Carries no ownership. Resolution is a lookup at the point of use and a
/// handle whose target is gone simply resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Handle(pub u64);

impl Handle {
    /// The handle that refers to nothing. Id 0 is never issued.
    pub const NONE: Handle = Handle(0);

    pub fn to(id: PersistentId) -> Self {
        Self(id.0)
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn id(self) -> PersistentId {
        PersistentId(self.0)
    }
}

impl From<PersistentId> for Handle {
    fn from(id: PersistentId) -> Self {
        Self::to(id)
    }
}

/// Stable key of an object that comes from static map data.
///
/// Present only on map-placed objects. Restore matches such objects by key
/// and mutates them in place instead of recreating them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OriginKey(pub String);

impl OriginKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OriginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Spatial transform: position, rotation, scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}
