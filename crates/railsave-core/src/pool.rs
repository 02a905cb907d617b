//! Fixed-capacity, index-addressed object pools with generational handles.
//!
//! Every persisted entity lives in a [`Pool`] slot whose index is the ID
//! written to disk. A slot's generation is bumped whenever its occupant is
//! destroyed, so a [`Handle`] taken before the removal stops resolving even
//! if a new object is later built at the same index.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::error::{Result, SaveLoadError};

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Untyped (index, generation) pair, as stored in a reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle {
    pub index: u32,
    pub generation: u32,
}

/// Typed reference to a live pool object.
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub fn from_raw(raw: RawHandle) -> Self {
        Self {
            index: raw.index,
            generation: raw.generation,
            _marker: PhantomData,
        }
    }

    pub fn raw(self) -> RawHandle {
        RawHandle {
            index: self.index,
            generation: self.generation,
        }
    }

    /// The pool index, which is also the on-disk ID.
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// Observable state of one pool index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Never allocated, or freed.
    Vacant,
    /// Deleted, but the ID must not be handed out again yet.
    Retired,
    Occupied,
}

#[derive(Debug, Clone)]
enum Entry<T> {
    Vacant,
    Retired,
    Occupied(T),
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    entry: Entry<T>,
}

impl<T> Slot<T> {
    fn vacant() -> Self {
        Self {
            generation: 0,
            entry: Entry::Vacant,
        }
    }

    fn take(&mut self, then: Entry<T>) -> Option<T> {
        match std::mem::replace(&mut self.entry, then) {
            Entry::Occupied(value) => {
                self.generation = self.generation.wrapping_add(1);
                Some(value)
            }
            previous => {
                self.entry = previous;
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Fixed-capacity slot array owning every object of one kind.
#[derive(Debug, Clone)]
pub struct Pool<T> {
    name: &'static str,
    capacity: usize,
    slots: Vec<Slot<T>>,
    len: usize,
}

impl<T> Pool<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            slots: Vec::new(),
            len: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the highest index ever touched.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Whether `n` more objects fit.
    pub fn can_allocate(&self, n: usize) -> bool {
        let free = self
            .slots
            .iter()
            .filter(|s| matches!(s.entry, Entry::Vacant))
            .count();
        free + (self.capacity - self.slots.len()) >= n
    }

    /// Verify that `index` could receive a new object.
    pub fn check_index(&self, index: u32) -> Result<()> {
        if index as usize >= self.capacity {
            return Err(SaveLoadError::AllocationExhausted {
                pool: self.name,
                index,
                capacity: self.capacity,
            });
        }
        match self.slots.get(index as usize) {
            Some(Slot {
                entry: Entry::Occupied(_),
                ..
            }) => Err(SaveLoadError::DuplicateIndex {
                pool: self.name,
                index,
            }),
            _ => Ok(()),
        }
    }

    fn ensure_slot(&mut self, index: u32) -> &mut Slot<T> {
        let i = index as usize;
        if i >= self.slots.len() {
            self.slots.resize_with(i + 1, Slot::vacant);
        }
        &mut self.slots[i]
    }

    /// Place `value` at the first vacant index.
    pub fn insert(&mut self, value: T) -> Result<Handle<T>> {
        let index = match self
            .slots
            .iter()
            .position(|s| matches!(s.entry, Entry::Vacant))
        {
            Some(i) => i,
            None => self.slots.len(),
        };
        self.insert_at(index as u32, value)
    }

    /// Place `value` at exactly `index`.
    pub fn insert_at(&mut self, index: u32, value: T) -> Result<Handle<T>> {
        self.check_index(index)?;
        let slot = self.ensure_slot(index);
        slot.entry = Entry::Occupied(value);
        let generation = slot.generation;
        self.len += 1;
        Ok(Handle::from_raw(RawHandle { index, generation }))
    }

    /// Mark a never-live `index` as retired.
    pub fn retire_at(&mut self, index: u32) -> Result<()> {
        self.check_index(index)?;
        self.ensure_slot(index).entry = Entry::Retired;
        Ok(())
    }

    /// Destroy the object behind `handle`, freeing its index.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        if self.handle_at(handle.index) != Some(handle) {
            return None;
        }
        self.remove_at(handle.index)
    }

    /// Destroy whatever lives at `index`, freeing the index.
    pub fn remove_at(&mut self, index: u32) -> Option<T> {
        let value = self.slots.get_mut(index as usize)?.take(Entry::Vacant)?;
        self.len -= 1;
        Some(value)
    }

    /// Destroy the object at `index` but keep the ID reserved.
    pub fn retire(&mut self, handle: Handle<T>) -> Option<T> {
        if self.handle_at(handle.index) != Some(handle) {
            return None;
        }
        let value = self.slots[handle.index as usize].take(Entry::Retired)?;
        self.len -= 1;
        Some(value)
    }

    /// Turn every retired index back into a vacant one.
    pub fn release_retired(&mut self) {
        for slot in &mut self.slots {
            if matches!(slot.entry, Entry::Retired) {
                slot.entry = Entry::Vacant;
            }
        }
    }

    /// Destroy the object at `index` and build its replacement from it at
    /// the same index. Handles to the old object become stale.
    pub fn reconstruct_at(&mut self, index: u32, rebuild: impl FnOnce(T) -> T) -> Option<Handle<T>> {
        let old = self.remove_at(index)?;
        let slot = &mut self.slots[index as usize];
        slot.entry = Entry::Occupied(rebuild(old));
        self.len += 1;
        Some(Handle::from_raw(RawHandle {
            index,
            generation: slot.generation,
        }))
    }

    pub fn slot_state(&self, index: u32) -> SlotState {
        match self.slots.get(index as usize).map(|s| &s.entry) {
            Some(Entry::Occupied(_)) => SlotState::Occupied,
            Some(Entry::Retired) => SlotState::Retired,
            Some(Entry::Vacant) | None => SlotState::Vacant,
        }
    }

    /// Handle of the live object at `index`.
    pub fn handle_at(&self, index: u32) -> Option<Handle<T>> {
        let slot = self.slots.get(index as usize)?;
        match slot.entry {
            Entry::Occupied(_) => Some(Handle::from_raw(RawHandle {
                index,
                generation: slot.generation,
            })),
            _ => None,
        }
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        match &slot.entry {
            Entry::Occupied(v) if slot.generation == handle.generation => Some(v),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        match &mut slot.entry {
            Entry::Occupied(v) if slot.generation == handle.generation => Some(v),
            _ => None,
        }
    }

    pub fn get_index(&self, index: u32) -> Option<&T> {
        match &self.slots.get(index as usize)?.entry {
            Entry::Occupied(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_index_mut(&mut self, index: u32) -> Option<&mut T> {
        match &mut self.slots.get_mut(index as usize)?.entry {
            Entry::Occupied(v) => Some(v),
            _ => None,
        }
    }

    /// Live objects in index order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match &slot.entry {
            Entry::Occupied(v) => Some((
                Handle::from_raw(RawHandle {
                    index: i as u32,
                    generation: slot.generation,
                }),
                v,
            )),
            _ => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| match &mut slot.entry {
                Entry::Occupied(v) => Some((
                    Handle::from_raw(RawHandle {
                        index: i as u32,
                        generation: slot.generation,
                    }),
                    v,
                )),
                _ => None,
            })
    }

    /// Every index with its state, in index order.
    pub fn slot_states(&self) -> impl Iterator<Item = (u32, SlotState)> + '_ {
        (0..self.slots.len() as u32).map(|i| (i, self.slot_state(i)))
    }

    /// Generation of each occupied index; `None` for vacant or retired ones.
    pub fn occupancy(&self) -> Vec<Option<u32>> {
        self.slots
            .iter()
            .map(|slot| match slot.entry {
                Entry::Occupied(_) => Some(slot.generation),
                _ => None,
            })
            .collect()
    }
}
