//! Opaque handle slots.
//!
//! A [`HandleSlot`] is two machine words that let code on the far side of
//! the boundary hold a counted reference to a native object it cannot see.
//! The words are a kind tag and an id into a [`HandleTable`]; a slot whose
//! words are both zero is empty.
//!
//! Slots are deliberately neither `Clone` nor `Copy`: a bitwise copy would
//! alias a reference without counting it. Duplicate a slot with
//! [`HandleTable::copy`] and release it with [`HandleTable::destroy`], or
//! let [`OwnedHandle`] do both.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use strum::{Display, FromRepr};

use crate::error::LifecycleError;

/// Kind of object a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[strum(serialize_all = "snake_case")]
#[repr(u64)]
pub enum HandleKind {
    Result = 1,
    Category = 2,
    Department = 3,
    SearchReply = 4,
    PreviewReply = 5,
    ScopeMetadata = 6,
}

impl HandleKind {
    /// The tag stored in a slot's first word.
    pub fn tag(self) -> u64 {
        self as u64
    }

    /// Resolve a slot tag.
    pub fn from_tag(tag: u64) -> Result<Self, LifecycleError> {
        Self::from_repr(tag).ok_or(LifecycleError::UnknownKind { tag })
    }
}

/// Native type that may be referenced from a handle slot.
pub trait Tracked: Send + Sync + 'static {
    /// Tag stored in slots referring to this type.
    const KIND: HandleKind;
}

/// Two-word storage for a counted reference.
#[repr(C)]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct HandleSlot {
    kind: u64,
    id: u64,
}

impl HandleSlot {
    /// An empty slot.
    pub const EMPTY: Self = Self { kind: 0, id: 0 };

    /// Create an empty slot.
    pub const fn empty() -> Self {
        Self::EMPTY
    }

    /// Whether the slot holds no reference.
    pub fn is_empty(&self) -> bool {
        self.kind == 0 && self.id == 0
    }

    /// The raw words `[kind, id]`.
    pub fn words(&self) -> [u64; 2] {
        [self.kind, self.id]
    }

    /// Table id of the referenced object (zero when empty).
    pub fn id(&self) -> u64 {
        self.id
    }

    fn clear(&mut self) {
        *self = Self::EMPTY;
    }
}

/// Shared mutable cell for tracked objects that change after creation.
///
/// Lock poisoning is ignored: a panic on another thread never makes the
/// object unreachable from the boundary.
#[derive(Debug, Default)]
pub struct Shared<T>(RwLock<T>);

impl<T> Shared<T> {
    /// Wrap a value.
    pub fn new(value: T) -> Self {
        Self(RwLock::new(value))
    }

    /// Lock for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock for writing.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone the current contents.
    pub fn snapshot(&self) -> T
    where
        T: Clone,
    {
        self.read().clone()
    }
}

struct TableEntry {
    kind: HandleKind,
    object: Arc<dyn Any + Send + Sync>,
    holders: AtomicUsize,
}

/// Registry of objects referenced from handle slots.
///
/// Each live entry counts the slots that refer to it. The entry, and with
/// it the table's reference to the object, is dropped when the count
/// reaches zero.
pub struct HandleTable {
    entries: DashMap<u64, TableEntry>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("live", &self.entries.len())
            .finish()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// The process-wide table used by the C ABI.
    pub fn global() -> Arc<HandleTable> {
        static GLOBAL: OnceLock<Arc<HandleTable>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(HandleTable::new())).clone()
    }

    /// Store a new reference to `object` in an empty slot.
    pub fn insert<T: Tracked>(
        &self,
        slot: &mut HandleSlot,
        object: Arc<T>,
    ) -> Result<(), LifecycleError> {
        ensure_empty(slot)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            id,
            TableEntry {
                kind: T::KIND,
                object,
                holders: AtomicUsize::new(1),
            },
        );
        *slot = HandleSlot {
            kind: T::KIND.tag(),
            id,
        };
        Ok(())
    }

    /// Initialize `dest` as another counted reference to `source`'s object.
    pub fn copy(&self, dest: &mut HandleSlot, source: &HandleSlot) -> Result<(), LifecycleError> {
        ensure_empty(dest)?;
        let kind = self.kind_of(source)?;
        let entry = self
            .entries
            .get(&source.id)
            .ok_or(LifecycleError::StaleHandle { id: source.id })?;
        entry.holders.fetch_add(1, Ordering::AcqRel);
        *dest = HandleSlot {
            kind: kind.tag(),
            id: source.id,
        };
        Ok(())
    }

    /// Resolve a slot to its object.
    pub fn get<T: Tracked>(&self, slot: &HandleSlot) -> Result<Arc<T>, LifecycleError> {
        let kind = self.kind_of(slot)?;
        if kind != T::KIND {
            return Err(LifecycleError::KindMismatch {
                expected: T::KIND,
                found: kind,
            });
        }
        let object = self
            .entries
            .get(&slot.id)
            .map(|entry| entry.object.clone())
            .ok_or(LifecycleError::StaleHandle { id: slot.id })?;
        object.downcast::<T>().map_err(|_| LifecycleError::KindMismatch {
            expected: T::KIND,
            found: kind,
        })
    }

    /// Kind of the object a slot refers to.
    pub fn kind_of(&self, slot: &HandleSlot) -> Result<HandleKind, LifecycleError> {
        if slot.is_empty() {
            return Err(LifecycleError::EmptySlot);
        }
        let kind = HandleKind::from_tag(slot.kind)?;
        match self.entries.get(&slot.id) {
            Some(entry) if entry.kind == kind => Ok(kind),
            Some(entry) => Err(LifecycleError::KindMismatch {
                expected: kind,
                found: entry.kind,
            }),
            None => Err(LifecycleError::StaleHandle { id: slot.id }),
        }
    }

    /// Release a slot's reference and reset it to empty.
    ///
    /// Destroying an empty slot does nothing.
    pub fn destroy(&self, slot: &mut HandleSlot) -> Result<(), LifecycleError> {
        if slot.is_empty() {
            return Ok(());
        }
        let id = slot.id;
        slot.clear();
        let released = match self.entries.entry(id) {
            Entry::Occupied(entry) => {
                if entry.get().holders.fetch_sub(1, Ordering::AcqRel) == 1 {
                    Some(entry.remove())
                } else {
                    None
                }
            }
            Entry::Vacant(_) => return Err(LifecycleError::StaleHandle { id }),
        };
        // Drop the object only after the shard lock is released.
        drop(released);
        Ok(())
    }

    /// Number of slots referring to the same object as `slot`.
    pub fn holders(&self, slot: &HandleSlot) -> usize {
        if slot.is_empty() {
            return 0;
        }
        self.entries
            .get(&slot.id)
            .map(|entry| entry.holders.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no objects are live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn ensure_empty(slot: &HandleSlot) -> Result<(), LifecycleError> {
    if slot.is_empty() {
        Ok(())
    } else {
        Err(LifecycleError::SlotOccupied {
            kind: HandleKind::from_tag(slot.kind)
                .map(|k| k.to_string())
                .unwrap_or_else(|_| format!("tag {}", slot.kind)),
        })
    }
}

/// A slot that releases its reference when dropped.
pub struct OwnedHandle<T: Tracked> {
    table: Arc<HandleTable>,
    slot: HandleSlot,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Tracked> std::fmt::Debug for OwnedHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedHandle")
            .field("kind", &T::KIND)
            .field("id", &self.slot.id)
            .finish()
    }
}

impl<T: Tracked> OwnedHandle<T> {
    /// Register `object` in `table` and hold the first reference.
    pub fn new(table: &Arc<HandleTable>, object: Arc<T>) -> Result<Self, LifecycleError> {
        let mut slot = HandleSlot::empty();
        table.insert(&mut slot, object)?;
        Ok(Self::from_parts(table, slot))
    }

    /// Take over an initialized slot, checking its kind.
    pub fn adopt(table: &Arc<HandleTable>, slot: HandleSlot) -> Result<Self, LifecycleError> {
        let owned = Self::from_parts(table, slot);
        let kind = owned.table.kind_of(&owned.slot)?;
        if kind != T::KIND {
            return Err(LifecycleError::KindMismatch {
                expected: T::KIND,
                found: kind,
            });
        }
        Ok(owned)
    }

    /// Hold a new reference to the object behind a borrowed slot.
    pub fn copy_from(table: &Arc<HandleTable>, source: &HandleSlot) -> Result<Self, LifecycleError> {
        let mut slot = HandleSlot::empty();
        table.copy(&mut slot, source)?;
        Self::adopt(table, slot)
    }

    fn from_parts(table: &Arc<HandleTable>, slot: HandleSlot) -> Self {
        Self {
            table: table.clone(),
            slot,
            _kind: PhantomData,
        }
    }

    /// Resolve to the referenced object.
    pub fn get(&self) -> Result<Arc<T>, LifecycleError> {
        self.table.get(&self.slot)
    }

    /// Another counted reference to the same object.
    pub fn try_clone(&self) -> Result<Self, LifecycleError> {
        Self::copy_from(&self.table, &self.slot)
    }

    /// The underlying slot.
    pub fn slot(&self) -> &HandleSlot {
        &self.slot
    }

    /// The table holding the object.
    pub fn table(&self) -> &Arc<HandleTable> {
        &self.table
    }

    /// Give up ownership of the slot without releasing it.
    pub fn into_slot(mut self) -> HandleSlot {
        std::mem::take(&mut self.slot)
    }
}

impl<T: Tracked> Drop for OwnedHandle<T> {
    fn drop(&mut self) {
        if let Err(e) = self.table.destroy(&mut self.slot) {
            let kind = T::KIND;
            tracing::warn!(target: "bridge", kind = %kind, "failed to release handle: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Counter(u32);

    impl Tracked for Counter {
        const KIND: HandleKind = HandleKind::Result;
    }

    #[derive(Debug)]
    struct Other;

    impl Tracked for Other {
        const KIND: HandleKind = HandleKind::Category;
    }

    #[test]
    fn test_insert_get_destroy() {
        let table = HandleTable::new();
        let mut slot = HandleSlot::empty();
        table.insert(&mut slot, Arc::new(Counter(7))).unwrap();

        assert!(!slot.is_empty());
        assert_eq!(table.get::<Counter>(&slot).unwrap().0, 7);

        table.destroy(&mut slot).unwrap();
        assert!(slot.is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn test_copy_counts_holders() {
        let table = HandleTable::new();
        let mut a = HandleSlot::empty();
        let mut b = HandleSlot::empty();
        table.insert(&mut a, Arc::new(Counter(1))).unwrap();
        table.copy(&mut b, &a).unwrap();

        assert_eq!(table.holders(&a), 2);
        table.destroy(&mut a).unwrap();
        assert_eq!(table.holders(&b), 1);
        assert_eq!(table.get::<Counter>(&b).unwrap().0, 1);
        table.destroy(&mut b).unwrap();
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_insert_into_occupied_slot_fails() {
        let table = HandleTable::new();
        let mut slot = HandleSlot::empty();
        table.insert(&mut slot, Arc::new(Counter(1))).unwrap();
        let err = table.insert(&mut slot, Arc::new(Counter(2))).unwrap_err();
        assert!(matches!(err, LifecycleError::SlotOccupied { .. }));
        table.destroy(&mut slot).unwrap();
    }

    #[test]
    fn test_kind_mismatch() {
        let table = HandleTable::new();
        let mut slot = HandleSlot::empty();
        table.insert(&mut slot, Arc::new(Other)).unwrap();
        let err = table.get::<Counter>(&slot).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::KindMismatch {
                expected: HandleKind::Result,
                found: HandleKind::Category,
            }
        );
        table.destroy(&mut slot).unwrap();
    }

    #[test]
    fn test_destroy_empty_is_noop() {
        let table = HandleTable::new();
        let mut slot = HandleSlot::empty();
        assert!(table.destroy(&mut slot).is_ok());
        assert!(matches!(table.get::<Counter>(&slot), Err(LifecycleError::EmptySlot)));
    }

    #[test]
    fn test_owned_handle_releases_on_drop() {
        let table = Arc::new(HandleTable::new());
        let owned = OwnedHandle::new(&table, Arc::new(Counter(3))).unwrap();
        let copy = owned.try_clone().unwrap();
        assert_eq!(table.holders(owned.slot()), 2);

        drop(owned);
        assert_eq!(copy.get().unwrap().0, 3);
        drop(copy);
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_copies_and_releases() {
        let table = Arc::new(HandleTable::new());
        let root = OwnedHandle::new(&table, Arc::new(Counter(9))).unwrap();

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..200 {
                        let copy = root.try_clone().unwrap();
                        assert_eq!(copy.get().unwrap().0, 9);
                    }
                });
            }
        });

        assert_eq!(table.holders(root.slot()), 1);
        drop(root);
        assert!(table.is_empty());
    }
}
