//! Generation-checked arena.
//!
//! `spec.md` §9 re-architects the source's cyclic task/mutex references
//! as "arena-allocated task and mutex records with stable indices ...
//! No direct reference cycles; the arena owns everything and the kernel
//! holds indices." This module is that arena, shared by the task table,
//! the mutex table, the semaphore table, and the condition-variable
//! table.
//!
//! A generation counter on every slot turns a use of a destroyed object's
//! stale index into `KernelError::Invalid` instead of silently aliasing a
//! reused slot — the `mutex_destroy` / subsequent-`Invalid` requirement
//! of `spec.md` §8 scenario 4.

use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;

use crate::error::KernelError;

/// A stable reference into an [`Arena<T>`].
pub struct Index<T> {
    slot: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Index<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T> Clone for Index<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Index<T> {}
impl<T> PartialEq for Index<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}
impl<T> Eq for Index<T> {}

impl<T> Index<T> {
    pub(crate) fn slot(&self) -> usize {
        self.slot as usize
    }

    /// Construct an `Index` out of thin air, for tests that need a
    /// distinct, comparable identity without going through a real arena.
    #[cfg(test)]
    pub(crate) fn from_raw(slot: u32, generation: u32) -> Self {
        Self {
            slot,
            generation,
            _marker: PhantomData,
        }
    }

    /// A placeholder identity that never compares equal to a real index
    /// returned by [`Arena::insert`] (it would require `u32::MAX`
    /// allocations from one arena). Used to give a record a momentary
    /// `id` field value in the brief window between reserving its slot
    /// and learning what that slot's real index is.
    pub(crate) fn dangling() -> Self {
        Self {
            slot: u32::MAX,
            generation: u32::MAX,
            _marker: PhantomData,
        }
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// An object pool indexed by generation-checked [`Index`]. Slots freed by
/// [`Arena::remove`] are recycled by [`Arena::insert`].
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
}

impl<T> Arena<T> {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
        }
    }

    pub fn insert(&mut self, value: T) -> Index<T> {
        if let Some(slot) = self.free_head {
            let (next_free, generation) = match &self.slots[slot as usize] {
                Slot::Vacant {
                    next_free,
                    generation,
                } => (*next_free, *generation),
                Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            self.free_head = next_free;
            self.slots[slot as usize] = Slot::Occupied { generation, value };
            Index {
                slot,
                generation,
                _marker: PhantomData,
            }
        } else {
            let slot = self.slots.len() as u32;
            self.slots.push(Slot::Occupied {
                generation: 0,
                value,
            });
            Index {
                slot,
                generation: 0,
                _marker: PhantomData,
            }
        }
    }

    pub fn get(&self, index: Index<T>) -> Result<&T, KernelError> {
        match self.slots.get(index.slot()) {
            Some(Slot::Occupied { generation, value }) if *generation == index.generation => {
                Ok(value)
            }
            _ => Err(KernelError::Invalid),
        }
    }

    pub fn get_mut(&mut self, index: Index<T>) -> Result<&mut T, KernelError> {
        match self.slots.get_mut(index.slot()) {
            Some(Slot::Occupied { generation, value }) if *generation == index.generation => {
                Ok(value)
            }
            _ => Err(KernelError::Invalid),
        }
    }

    /// Remove the object at `index`, returning it. Future lookups with
    /// this or any other stale `Index` into the same slot fail with
    /// `KernelError::Invalid` because the slot's generation is bumped.
    pub fn remove(&mut self, index: Index<T>) -> Result<T, KernelError> {
        match self.slots.get(index.slot()) {
            Some(Slot::Occupied { generation, .. }) if *generation == index.generation => {}
            _ => return Err(KernelError::Invalid),
        }
        let next_free = self.free_head;
        let generation = index.generation.wrapping_add(1);
        let old = core::mem::replace(
            &mut self.slots[index.slot()],
            Slot::Vacant {
                generation,
                next_free,
            },
        );
        self.free_head = Some(index.slot);
        match old {
            Slot::Occupied { value, .. } => Ok(value),
            Slot::Vacant { .. } => unreachable!(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Index<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| match s {
            Slot::Occupied { generation, value } => Some((
                Index {
                    slot: i as u32,
                    generation: *generation,
                    _marker: PhantomData,
                },
                value,
            )),
            Slot::Vacant { .. } => None,
        })
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut a: Arena<u32> = Arena::new();
        let i1 = a.insert(10);
        let i2 = a.insert(20);
        assert_eq!(*a.get(i1).unwrap(), 10);
        assert_eq!(*a.get(i2).unwrap(), 20);
        assert_eq!(a.remove(i1).unwrap(), 10);
        assert_eq!(a.get(i1), Err(KernelError::Invalid));
        assert_eq!(*a.get(i2).unwrap(), 20);
    }

    #[test]
    fn stale_index_after_slot_reuse_is_invalid() {
        let mut a: Arena<u32> = Arena::new();
        let i1 = a.insert(1);
        a.remove(i1).unwrap();
        let i2 = a.insert(2);
        assert_eq!(i1.slot(), i2.slot());
        assert_eq!(a.get(i1), Err(KernelError::Invalid));
        assert_eq!(*a.get(i2).unwrap(), 2);
    }
}
