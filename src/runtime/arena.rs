//! Host objects addressed by integer handle.
//!
//! Scripts never hold references into host memory: a class value in script
//! memory is a 4-byte handle, and callbacks look the object up in an arena
//! reached through the state's user context. Freed slots are reused.

use thiserror::Error;

/// Handle of an object in an [`ObjectArena`]. `0` is never a valid handle,
/// so zeroed script memory reads as "no object".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CollectionHandle(pub i32);

impl CollectionHandle {
    pub const NULL: CollectionHandle = CollectionHandle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    fn slot(self) -> Option<usize> {
        usize::try_from(self.0).ok()?.checked_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArenaError {
    #[error("invalid handle {0}")]
    InvalidHandle(i32),

    #[error("double free of handle {0}")]
    DoubleFree(i32),
}

#[derive(Debug, Clone)]
pub struct ObjectArena<T> {
    slots: Vec<Option<T>>,
    free_list: Vec<usize>,
}

impl<T> Default for ObjectArena<T> {
    fn default() -> Self {
        ObjectArena {
            slots: Vec::new(),
            free_list: Vec::new(),
        }
    }
}

impl<T> ObjectArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, object: T) -> CollectionHandle {
        let slot = match self.free_list.pop() {
            Some(slot) => {
                self.slots[slot] = Some(object);
                slot
            }
            None => {
                self.slots.push(Some(object));
                self.slots.len() - 1
            }
        };
        CollectionHandle(slot as i32 + 1)
    }

    pub fn get(&self, handle: CollectionHandle) -> Option<&T> {
        self.slots.get(handle.slot()?)?.as_ref()
    }

    pub fn get_mut(&mut self, handle: CollectionHandle) -> Option<&mut T> {
        self.slots.get_mut(handle.slot()?)?.as_mut()
    }

    pub fn remove(&mut self, handle: CollectionHandle) -> Result<T, ArenaError> {
        let slot = handle.slot().ok_or(ArenaError::InvalidHandle(handle.0))?;
        let entry = self
            .slots
            .get_mut(slot)
            .ok_or(ArenaError::InvalidHandle(handle.0))?;
        let object = entry.take().ok_or(ArenaError::DoubleFree(handle.0))?;
        self.free_list.push(slot);
        Ok(object)
    }

    /// Live objects.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (CollectionHandle, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|o| (CollectionHandle(i as i32 + 1), o)))
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_list.clear();
    }
}
