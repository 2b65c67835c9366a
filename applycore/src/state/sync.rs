//! The synchronized state store.

use super::{ObjectSrc, ResourceInstanceObject, State};
use crate::addrs::{DeposedKey, ResourceInstanceAddr, ResourceMode};
use crate::errors::StateError;
use crate::schema::{Schema, SchemaSource};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

type ObjectKey = (ResourceInstanceAddr, DeposedKey);

#[derive(Debug, Clone)]
struct Entry {
    decoded: Result<Arc<ResourceInstanceObject>, StateError>,
    src: Arc<ObjectSrc>,
}

#[derive(Debug, Clone, Default)]
struct Objects {
    entries: BTreeMap<ObjectKey, Entry>,
    // Every deposed key ever seen, so that depose never reuses one.
    used_deposed: BTreeSet<ObjectKey>,
}

impl Objects {
    fn has_current(&self, addr: &ResourceInstanceAddr) -> bool {
        self.entries.contains_key(&(addr.clone(), DeposedKey::NOT_DEPOSED))
    }

    fn fresh_deposed_key(&self, addr: &ResourceInstanceAddr) -> DeposedKey {
        loop {
            let key = DeposedKey::random();
            if !self.used_deposed.contains(&(addr.clone(), key)) {
                return key;
            }
        }
    }

    fn depose(&mut self, addr: &ResourceInstanceAddr) -> Option<DeposedKey> {
        let entry = self.entries.remove(&(addr.clone(), DeposedKey::NOT_DEPOSED))?;
        let key = self.fresh_deposed_key(addr);
        self.used_deposed.insert((addr.clone(), key));
        self.entries.insert((addr.clone(), key), entry);
        Some(key)
    }
}

/// A concurrency-safe store of resource instance objects, keyed by address
/// and deposed key.
///
/// Objects are replaced wholesale, never edited in place, so a caller
/// holding an `Arc` obtained earlier keeps seeing a consistent object.
#[derive(Debug, Default)]
pub struct SyncState {
    objects: Mutex<Objects>,
}

impl SyncState {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store by decoding every object in `state` against the
    /// current schema of its resource type.
    ///
    /// Objects that fail to decode are kept in their stored form: reading
    /// one reports the decode error, and finalizing writes it back
    /// unchanged.
    pub fn from_state<S: SchemaSource + ?Sized>(state: &State, schemas: &S) -> Self {
        let mut objects = Objects::default();
        for (addr, deposed_key, src) in state.objects() {
            let decoded = schemas
                .resource_type_schema(&src.provider.provider, addr.mode, &addr.resource_type)
                .map_err(|source| StateError::NoSchema {
                    object: crate::addrs::object_label(addr, deposed_key),
                    source,
                })
                .and_then(|schema| src.decode(addr, deposed_key, &schema))
                .map(Arc::new);
            if let Err(err) = &decoded {
                warn!(%addr, %deposed_key, error = %err, "prior state object cannot be decoded");
            }
            if deposed_key.is_deposed() {
                objects.used_deposed.insert((addr.clone(), deposed_key));
            }
            objects.entries.insert(
                (addr.clone(), deposed_key),
                Entry {
                    decoded,
                    src: Arc::new(src.clone()),
                },
            );
        }
        Self {
            objects: Mutex::new(objects),
        }
    }

    /// Looks up the object at `addr` and `deposed_key`. `None` if there is
    /// no such object; an error if it exists but could not be decoded.
    pub fn get(
        &self,
        addr: &ResourceInstanceAddr,
        deposed_key: DeposedKey,
    ) -> Option<Result<Arc<ResourceInstanceObject>, StateError>> {
        self.objects
            .lock()
            .entries
            .get(&(addr.clone(), deposed_key))
            .map(|entry| entry.decoded.clone())
    }

    /// Encodes `object` against `schema` and installs it, replacing any
    /// object already at that position. Nothing is stored if encoding
    /// fails.
    pub fn save(
        &self,
        addr: &ResourceInstanceAddr,
        deposed_key: DeposedKey,
        object: Arc<ResourceInstanceObject>,
        schema: &Schema,
    ) -> Result<(), StateError> {
        let src = object.encode(addr, deposed_key, schema)?;
        let mut objects = self.objects.lock();
        if deposed_key.is_deposed() {
            objects.used_deposed.insert((addr.clone(), deposed_key));
        }
        objects.entries.insert(
            (addr.clone(), deposed_key),
            Entry {
                decoded: Ok(object),
                src: Arc::new(src),
            },
        );
        Ok(())
    }

    /// Removes the object at `addr` and `deposed_key`. Returns false if
    /// there was none.
    pub fn remove(&self, addr: &ResourceInstanceAddr, deposed_key: DeposedKey) -> bool {
        self.objects.lock().entries.remove(&(addr.clone(), deposed_key)).is_some()
    }

    /// Moves the current object of `addr` to a fresh deposed key that was
    /// never used for `addr` before. `None` if there is no current object.
    pub fn depose(&self, addr: &ResourceInstanceAddr) -> Option<DeposedKey> {
        self.objects.lock().depose(addr)
    }

    /// Makes the deposed object `deposed_key` current again, unless `addr`
    /// already has a current object or the deposed object does not exist.
    pub fn maybe_restore_deposed(&self, addr: &ResourceInstanceAddr, deposed_key: DeposedKey) -> bool {
        if !deposed_key.is_deposed() {
            return false;
        }
        let mut objects = self.objects.lock();
        if objects.has_current(addr) {
            return false;
        }
        match objects.entries.remove(&(addr.clone(), deposed_key)) {
            Some(entry) => {
                objects.entries.insert((addr.clone(), DeposedKey::NOT_DEPOSED), entry);
                true
            }
            None => false,
        }
    }

    /// Moves the current object of `from` to become the current object of
    /// `to`. An object already current at `to` is deposed rather than
    /// overwritten. Returns false only if `from` has no current object.
    pub fn move_instance(&self, from: &ResourceInstanceAddr, to: &ResourceInstanceAddr) -> bool {
        let mut objects = self.objects.lock();
        let Some(entry) = objects.entries.remove(&(from.clone(), DeposedKey::NOT_DEPOSED)) else {
            return false;
        };
        if from != to && objects.depose(to).is_some() {
            warn!(%from, %to, "object moved onto an address that already had a current object; deposed it");
        }
        let entry = Entry {
            decoded: entry.decoded.map(|obj| {
                Arc::new(ResourceInstanceObject {
                    resource_type: to.resource_type.clone(),
                    ..(*obj).clone()
                })
            }),
            src: entry.src,
        };
        objects.entries.insert((to.clone(), DeposedKey::NOT_DEPOSED), entry);
        true
    }

    /// An independent store starting with the same objects. Objects are
    /// shared until either store replaces them.
    pub fn deep_copy(&self) -> Self {
        Self {
            objects: Mutex::new(self.objects.lock().clone()),
        }
    }

    /// Number of objects, current and deposed.
    pub fn len(&self) -> usize {
        self.objects.lock().entries.len()
    }

    /// Returns true if the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deposed keys currently held for `addr`.
    pub fn deposed_keys(&self, addr: &ResourceInstanceAddr) -> Vec<DeposedKey> {
        self.objects
            .lock()
            .entries
            .keys()
            .filter(|(a, key)| a == addr && key.is_deposed())
            .map(|(_, key)| *key)
            .collect()
    }

    /// Returns true if any stored object belongs to a resource of `mode`.
    pub fn has_mode(&self, mode: ResourceMode) -> bool {
        self.objects.lock().entries.keys().any(|(addr, _)| addr.mode == mode)
    }

    /// Writes every stored object into a new snapshot.
    pub fn to_state(&self, serial: u64, lineage: Uuid) -> State {
        let mut state = State {
            serial,
            lineage,
            ..State::new()
        };
        let objects = self.objects.lock();
        for ((addr, deposed_key), entry) in &objects.entries {
            state.set_object(addr.clone(), *deposed_key, (*entry.src).clone());
        }
        state
    }
}
