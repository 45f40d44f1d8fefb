//! Owned collections of live protocol objects.
//!
//! Objects are addressed by generation-counted ids. A stale id (its object
//! destroyed, the slot possibly reused) never resolves, so holders of an id
//! get a typed "gone" result instead of a dangling reference.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::error::RegistryError;

pub struct Id<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    /// An id no registry ever hands out, for resources whose creation failed.
    pub fn dangling() -> Self {
        Self {
            index: u32::MAX,
            generation: u32::MAX,
            _marker: PhantomData,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub struct Registry<T> {
    kind: &'static str,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    limit: usize,
}

impl<T> Registry<T> {
    pub fn new(kind: &'static str, limit: usize) -> Self {
        Self {
            kind,
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            limit,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn insert(&mut self, value: T) -> Result<Id<T>, RegistryError> {
        if self.len >= self.limit {
            log::error!("[registry] {} limit of {} reached", self.kind, self.limit);
            return Err(RegistryError::NoMemory {
                kind: self.kind,
                limit: self.limit,
            });
        }

        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.value = Some(value);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                (self.slots.len() - 1) as u32
            }
        };

        self.len += 1;
        Ok(Id {
            index,
            generation: self.slots[index as usize].generation,
            _marker: PhantomData,
        })
    }

    /// Removes the object if `id` is still live. Calling it again, or with a
    /// stale id, is a no-op.
    pub fn remove(&mut self, id: Id<T>) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, id: Id<T>) -> Option<&T> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, id: Id<T>) -> Option<&mut T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_mut()
    }

    pub fn lookup(&self, id: Id<T>) -> Result<&T, RegistryError> {
        self.get(id).ok_or(RegistryError::Gone(self.kind))
    }

    pub fn contains(&self, id: Id<T>) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    Id {
                        index: index as u32,
                        generation: slot.generation,
                        _marker: PhantomData,
                    },
                    value,
                )
            })
        })
    }

    pub fn ids(&self) -> Vec<Id<T>> {
        self.iter().map(|(id, _)| id).collect()
    }
}
