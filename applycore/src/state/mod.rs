//! State snapshots and the synchronized state store.
//!
//! A [`State`] is the persisted snapshot: every resource instance's current
//! object plus any deposed objects, in their stored (undecoded) form. During
//! an apply the engine works with [`SyncState`] instead, which holds decoded
//! objects behind a single mutex.

mod object;
mod sync;

pub use object::{ObjectSrc, ObjectStatus, ResourceInstanceObject};
pub use sync::SyncState;

use crate::addrs::{DeposedKey, ResourceInstanceAddr};
use crate::errors::StateError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// The only state snapshot format this engine reads and writes.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// The stored objects of one resource instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstanceSrc {
    /// The current object, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<ObjectSrc>,
    /// Objects superseded by create-before-destroy replacement
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deposed: BTreeMap<DeposedKey, ObjectSrc>,
}

impl InstanceSrc {
    fn is_empty(&self) -> bool {
        self.current.is_none() && self.deposed.is_empty()
    }
}

/// A persisted state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Snapshot format version
    pub format_version: u32,
    /// Incremented each time a new snapshot is written
    #[serde(default)]
    pub serial: u64,
    /// Identifies the history this snapshot belongs to
    #[serde(default = "Uuid::now_v7")]
    pub lineage: Uuid,
    /// Stored objects by resource instance
    #[serde(default)]
    pub resources: BTreeMap<ResourceInstanceAddr, InstanceSrc>,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// An empty snapshot starting a new lineage.
    pub fn new() -> Self {
        Self {
            format_version: STATE_FORMAT_VERSION,
            serial: 0,
            lineage: Uuid::now_v7(),
            resources: BTreeMap::new(),
        }
    }

    /// Parses a JSON snapshot.
    pub fn from_json(json: &str) -> Result<Self, StateError> {
        let state: Self = serde_json::from_str(json).map_err(|e| StateError::Json(e.to_string()))?;
        state.check_format()?;
        Ok(state)
    }

    /// Renders the snapshot as JSON.
    pub fn to_json(&self) -> Result<String, StateError> {
        serde_json::to_string_pretty(self).map_err(|e| StateError::Json(e.to_string()))
    }

    /// Fails unless the snapshot uses [`STATE_FORMAT_VERSION`].
    pub const fn check_format(&self) -> Result<(), StateError> {
        if self.format_version == STATE_FORMAT_VERSION {
            Ok(())
        } else {
            Err(StateError::UnsupportedFormatVersion {
                found: self.format_version,
                supported: STATE_FORMAT_VERSION,
            })
        }
    }

    /// The stored object at `addr` and `deposed_key`.
    pub fn object(&self, addr: &ResourceInstanceAddr, deposed_key: DeposedKey) -> Option<&ObjectSrc> {
        let instance = self.resources.get(addr)?;
        if deposed_key.is_deposed() {
            instance.deposed.get(&deposed_key)
        } else {
            instance.current.as_ref()
        }
    }

    /// Stores an object, replacing whatever was at that position.
    pub fn set_object(&mut self, addr: ResourceInstanceAddr, deposed_key: DeposedKey, src: ObjectSrc) {
        let instance = self.resources.entry(addr).or_default();
        if deposed_key.is_deposed() {
            instance.deposed.insert(deposed_key, src);
        } else {
            instance.current = Some(src);
        }
    }

    /// Removes an object, dropping the instance entry once it is empty.
    pub fn remove_object(&mut self, addr: &ResourceInstanceAddr, deposed_key: DeposedKey) -> Option<ObjectSrc> {
        let instance = self.resources.get_mut(addr)?;
        let removed = if deposed_key.is_deposed() {
            instance.deposed.remove(&deposed_key)
        } else {
            instance.current.take()
        };
        if instance.is_empty() {
            self.resources.remove(addr);
        }
        removed
    }

    /// Every stored object with its position.
    pub fn objects(&self) -> impl Iterator<Item = (&ResourceInstanceAddr, DeposedKey, &ObjectSrc)> {
        self.resources.iter().flat_map(|(addr, instance)| {
            instance
                .current
                .iter()
                .map(move |src| (addr, DeposedKey::NOT_DEPOSED, src))
                .chain(instance.deposed.iter().map(move |(key, src)| (addr, *key, src)))
        })
    }

    /// Returns true if the snapshot has no objects.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
