//! Fold records and their arena
//!
//! A fold pairs one managed value with one native handle. Folds sharing a
//! value identity within an engine form a doubly linked alias chain rooted at
//! the engine's value map. Records live in a generational arena so the native
//! side can hold a stable [`FoldId`] instead of a pointer.

use crate::codec::Object;
use crate::managed::{Managed, ValueKey};
use crate::native::{EngineAddr, NativeHandle, Ownership};
use std::fmt;
use std::sync::Arc;

/// Stable identity of a fold record.
///
/// Format: [32-bit index | 32-bit generation]
/// - Index: slot in the fold arena
/// - Generation: bumped when the slot is freed, so stale ids never resolve
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FoldId {
    index: u32,
    generation: u32,
}

impl FoldId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Pack into 64 bits for storage in a native pointer-sized slot.
    pub fn to_bits(&self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for FoldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Deferred initializer of a value created by a registered type.
pub(crate) type InitFn = Arc<dyn Fn(&Managed, Object) + Send + Sync>;

pub(crate) struct Fold {
    /// `None` until a callback resolves the owning engine.
    pub engine: Option<EngineAddr>,
    pub value: Managed,
    pub key: ValueKey,
    pub handle: NativeHandle,
    pub owner: Ownership,
    pub init: Option<InitFn>,
    pub prev: Option<FoldId>,
    pub next: Option<FoldId>,
}

impl Fold {
    pub fn new(value: Managed, key: ValueKey, owner: Ownership) -> Self {
        Self {
            engine: None,
            value,
            key,
            handle: NativeHandle::NULL,
            owner,
            init: None,
            prev: None,
            next: None,
        }
    }
}

struct Slot {
    generation: u32,
    fold: Option<Fold>,
}

/// Generational storage for fold records.
#[derive(Default)]
pub(crate) struct FoldArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl FoldArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, fold: Fold) -> FoldId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.fold = Some(fold);
            return FoldId::new(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            fold: Some(fold),
        });
        FoldId::new(index, 0)
    }

    pub fn get(&self, id: FoldId) -> Option<&Fold> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.fold.as_ref())
    }

    pub fn get_mut(&mut self, id: FoldId) -> Option<&mut Fold> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.fold.as_mut())
    }

    pub fn remove(&mut self, id: FoldId) -> Option<Fold> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)?;
        let fold = slot.fold.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(fold)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop the slot table. Only valid when no fold is alive.
    pub fn reset(&mut self) {
        debug_assert!(self.is_empty());
        self.slots.clear();
        self.free.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (FoldId, &Fold)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.fold
                .as_ref()
                .map(|fold| (FoldId::new(index as u32, slot.generation), fold))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::{Reflect, TypeBuilder};

    struct Blob;

    impl Reflect for Blob {
        fn describe(_ty: &mut TypeBuilder<Self>) {}
    }

    fn fold() -> Fold {
        let value = Managed::new(Blob);
        let key = value.key().unwrap();
        Fold::new(value, key, Ownership::Script)
    }

    #[test]
    fn stale_ids_do_not_resolve() {
        let mut arena = FoldArena::new();
        let a = arena.insert(fold());
        assert!(arena.remove(a).is_some());
        let b = arena.insert(fold());
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(arena.get(a).is_none());
        assert!(arena.get(b).is_some());
        assert!(arena.remove(a).is_none());
    }

    #[test]
    fn len_tracks_live_folds() {
        let mut arena = FoldArena::new();
        let ids: Vec<_> = (0..4).map(|_| arena.insert(fold())).collect();
        arena.remove(ids[1]);
        assert_eq!(arena.len(), 3);
        assert_eq!(arena.iter().count(), 3);
    }
}
