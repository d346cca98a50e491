//! Typed per-connection attribute storage.
//!
//! Dynamic per-connection state (proxy-tunnel flags, cached scratch
//! buffers) is hot enough that hashing a string per lookup hurts. Instead,
//! names are registered up front against an owner type and resolved to
//! small array indices once; after that every get/set is a plain slot
//! access through a typed [`AttributeKey`].
//!
//! The price is a registration deadline: once the first [`AttributeMap`]
//! for an owner type is built, that type's key set is frozen and further
//! registration fails with [`FrozenRegistryError`]. Maps are sized exactly
//! to the frozen key count, so indices are in range by construction.

use std::any::{type_name, Any, TypeId};
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use hashbrown::HashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::FrozenRegistryError;

/// A registered (owner type, name) pair resolved to a slot index.
///
/// The type parameter pins what the slot stores; `get`/`set` through the
/// key are statically typed. Keys are cheap to clone and are normally
/// registered once at startup and kept in app state.
pub struct AttributeKey<T> {
    owner: TypeId,
    owner_name: &'static str,
    name: Arc<str>,
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    /// Slot index within the owner's attribute maps.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The name this key was registered under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner,
            owner_name: self.owner_name,
            name: Arc::clone(&self.name),
            index: self.index,
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for AttributeKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeKey")
            .field("owner", &self.owner_name)
            .field("name", &self.name)
            .field("index", &self.index)
            .finish()
    }
}

struct OwnerSlots {
    // Name -> (index, value type). Indices are assigned monotonically in
    // registration order and never reused or renumbered.
    state: Mutex<OwnerState>,
}

struct OwnerState {
    keys: HashMap<String, (usize, TypeId)>,
    frozen: bool,
}

/// Process-wide registry mapping (owner type, name) to slot indices.
///
/// Registration takes a per-owner lock; it is a rare startup-path
/// operation. Reads after freezing go through [`AttributeKey`] and touch
/// no shared state at all.
#[derive(Default)]
pub struct AttributeRegistry {
    owners: DashMap<TypeId, Arc<OwnerSlots>>,
}

static GLOBAL: Lazy<AttributeRegistry> = Lazy::new(AttributeRegistry::new);

impl AttributeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            owners: DashMap::new(),
        }
    }

    /// The process-wide registry.
    ///
    /// Libraries that declare keys in statics use this; tests construct
    /// their own registries to stay isolated.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Register `name` for owner type `O`, or fetch the existing key.
    ///
    /// Idempotent: concurrent and repeated registrations of the same name
    /// all receive the same index. Fails once `O` is frozen, which happens
    /// when the first [`AttributeMap`] for `O` is constructed.
    ///
    /// Re-registering an existing name with a different value type is a
    /// programmer error caught by a debug assertion; in release builds the
    /// mismatched key simply never finds its value.
    pub fn register<O: 'static, T: 'static>(
        &self,
        name: &str,
    ) -> Result<AttributeKey<T>, FrozenRegistryError> {
        let slots = self.slots_for(TypeId::of::<O>());
        let mut state = slots.state.lock();

        if let Some(&(index, value_type)) = state.keys.get(name) {
            debug_assert_eq!(
                value_type,
                TypeId::of::<T>(),
                "attribute key `{name}` registered with two different value types"
            );
            return Ok(Self::key::<O, T>(name, index));
        }

        if state.frozen {
            return Err(FrozenRegistryError {
                owner: type_name::<O>(),
                name: name.to_owned(),
            });
        }

        let index = state.keys.len();
        state
            .keys
            .insert(name.to_owned(), (index, TypeId::of::<T>()));
        tracing::debug!(
            "[ATTRS] registered key `{}` for {} at slot {}",
            name,
            type_name::<O>(),
            index
        );
        Ok(Self::key::<O, T>(name, index))
    }

    /// Number of keys registered for owner type `O`.
    #[must_use]
    pub fn key_count<O: 'static>(&self) -> usize {
        self.slots_for(TypeId::of::<O>()).state.lock().keys.len()
    }

    /// Freeze `O`'s key set and return its size.
    fn freeze<O: 'static>(&self) -> usize {
        let slots = self.slots_for(TypeId::of::<O>());
        let mut state = slots.state.lock();
        state.frozen = true;
        state.keys.len()
    }

    fn slots_for(&self, owner: TypeId) -> Arc<OwnerSlots> {
        self.owners
            .entry(owner)
            .or_insert_with(|| {
                Arc::new(OwnerSlots {
                    state: Mutex::new(OwnerState {
                        keys: HashMap::new(),
                        frozen: false,
                    }),
                })
            })
            .clone()
    }

    fn key<O: 'static, T>(name: &str, index: usize) -> AttributeKey<T> {
        AttributeKey {
            owner: TypeId::of::<O>(),
            owner_name: type_name::<O>(),
            name: Arc::from(name),
            index,
            _marker: PhantomData,
        }
    }
}

/// Fixed-size typed storage attached to one connection or session.
///
/// Sized exactly to the owner type's key count at construction; slot `i`
/// holds the value for the key with index `i`. Lives and dies with its
/// owning connection on that connection's loop thread.
pub struct AttributeMap {
    owner: TypeId,
    slots: Box<[Option<Box<dyn Any>>]>,
}

impl AttributeMap {
    /// Build a map for owner type `O`, freezing `O`'s key set.
    #[must_use]
    pub fn for_owner<O: 'static>(registry: &AttributeRegistry) -> Self {
        let count = registry.freeze::<O>();
        let mut slots = Vec::with_capacity(count);
        slots.resize_with(count, || None);
        Self {
            owner: TypeId::of::<O>(),
            slots: slots.into_boxed_slice(),
        }
    }

    /// Number of slots (the owner's frozen key count).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Read the value stored under `key`, if any.
    #[must_use]
    pub fn get<T: 'static>(&self, key: &AttributeKey<T>) -> Option<&T> {
        debug_assert_eq!(key.owner, self.owner, "key used against a foreign owner's map");
        self.slots[key.index].as_ref()?.downcast_ref()
    }

    /// Mutable access to the value stored under `key`, if any.
    #[must_use]
    pub fn get_mut<T: 'static>(&mut self, key: &AttributeKey<T>) -> Option<&mut T> {
        debug_assert_eq!(key.owner, self.owner, "key used against a foreign owner's map");
        self.slots[key.index].as_mut()?.downcast_mut()
    }

    /// Store `value` under `key`, returning the previous value if one was
    /// set.
    pub fn set<T: 'static>(&mut self, key: &AttributeKey<T>, value: T) -> Option<T> {
        debug_assert_eq!(key.owner, self.owner, "key used against a foreign owner's map");
        self.slots[key.index]
            .replace(Box::new(value))
            .and_then(|old| old.downcast().ok())
            .map(|boxed| *boxed)
    }

    /// Remove and return the value stored under `key`.
    pub fn take<T: 'static>(&mut self, key: &AttributeKey<T>) -> Option<T> {
        debug_assert_eq!(key.owner, self.owner, "key used against a foreign owner's map");
        self.slots[key.index]
            .take()
            .and_then(|old| old.downcast().ok())
            .map(|boxed| *boxed)
    }
}

impl std::fmt::Debug for AttributeMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let occupied = self.slots.iter().filter(|s| s.is_some()).count();
        f.debug_struct("AttributeMap")
            .field("slots", &self.slots.len())
            .field("occupied", &occupied)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Session;

    #[test]
    fn register_is_idempotent() {
        let reg = AttributeRegistry::new();
        let a = reg.register::<Session, u32>("request-count").unwrap();
        let b = reg.register::<Session, u32>("request-count").unwrap();
        assert_eq!(a.index(), b.index());
        assert_eq!(reg.key_count::<Session>(), 1);
    }

    #[test]
    fn indices_are_monotonic() {
        let reg = AttributeRegistry::new();
        let a = reg.register::<Session, u32>("a").unwrap();
        let b = reg.register::<Session, String>("b").unwrap();
        let c = reg.register::<Session, bool>("c").unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(c.index(), 2);
    }

    #[test]
    fn frozen_after_first_map() {
        let reg = AttributeRegistry::new();
        let _early = reg.register::<Session, u32>("early").unwrap();

        let _map = AttributeMap::for_owner::<Session>(&reg);

        let err = reg.register::<Session, u32>("late").unwrap_err();
        assert_eq!(err.name, "late");
        assert!(err.owner.contains("Session"));

        // Re-registering an existing name still works after the freeze.
        let again = reg.register::<Session, u32>("early").unwrap();
        assert_eq!(again.index(), 0);
    }

    #[test]
    fn get_set_take_roundtrip() {
        let reg = AttributeRegistry::new();
        let count = reg.register::<Session, u64>("count").unwrap();
        let label = reg.register::<Session, String>("label").unwrap();

        let mut map = AttributeMap::for_owner::<Session>(&reg);
        assert_eq!(map.len(), 2);
        assert!(map.get(&count).is_none());

        assert!(map.set(&count, 7).is_none());
        assert_eq!(map.set(&count, 8), Some(7));
        assert_eq!(map.get(&count), Some(&8));

        map.set(&label, "tunnel".to_owned());
        *map.get_mut(&count).unwrap() += 1;
        assert_eq!(map.take(&count), Some(9));
        assert!(map.get(&count).is_none());
        assert_eq!(map.get(&label).map(String::as_str), Some("tunnel"));
    }

    #[test]
    fn owners_are_independent() {
        struct Other;

        let reg = AttributeRegistry::new();
        let s = reg.register::<Session, u32>("x").unwrap();
        let o = reg.register::<Other, u32>("x").unwrap();
        assert_eq!(s.index(), 0);
        assert_eq!(o.index(), 0);

        let _frozen = AttributeMap::for_owner::<Session>(&reg);
        // Other is untouched by Session's freeze.
        assert!(reg.register::<Other, u32>("y").is_ok());
    }

    #[test]
    fn concurrent_registration_yields_one_index() {
        let reg = std::sync::Arc::new(AttributeRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let reg = std::sync::Arc::clone(&reg);
            handles.push(std::thread::spawn(move || {
                reg.register::<Session, u32>("shared").unwrap().index()
            }));
        }
        let indices: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(indices.iter().all(|&i| i == indices[0]));
        assert_eq!(reg.key_count::<Session>(), 1);
    }
}
