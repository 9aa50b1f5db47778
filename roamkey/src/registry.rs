//! Transaction handles
//!
//! Platform callbacks that want to stop a transaction carry a handle, not a
//! reference. Handles are generational indices: each slot counts how many
//! times it has been vacated, so a handle that outlived its transaction is
//! rejected instead of stopping whatever reused the slot.

use crate::error::{Error, Result};
use crate::platform::{Platform, Presenter, TransactionEngine};
use crate::transaction::Transaction;

use std::fmt;

/// Capability to reach one transaction in a [`TransactionRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle {
    index: u32,
    generation: u32,
}

impl TransactionHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena of live transactions
pub struct TransactionRegistry<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for TransactionRegistry<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> TransactionRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store a value and return its handle
    pub fn insert(&mut self, value: T) -> TransactionHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return TransactionHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        TransactionHandle {
            index,
            generation: 0,
        }
    }

    pub fn contains(&self, handle: TransactionHandle) -> bool {
        self.get(handle).is_ok()
    }

    pub fn get(&self, handle: TransactionHandle) -> Result<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
            .ok_or(Error::StaleHandle(handle))
    }

    pub fn get_mut(&mut self, handle: TransactionHandle) -> Result<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
            .ok_or(Error::StaleHandle(handle))
    }

    /// Take the value out and invalidate every copy of the handle
    pub fn remove(&mut self, handle: TransactionHandle) -> Result<T> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(Error::StaleHandle(handle))?;
        let value = slot.value.take().ok_or(Error::StaleHandle(handle))?;

        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Ok(value)
    }
}

impl<P, R, E> TransactionRegistry<Transaction<P, R, E>>
where
    P: Platform,
    R: Presenter,
    E: TransactionEngine,
{
    /// Stop and drop the transaction behind `handle`
    pub fn stop(&mut self, handle: TransactionHandle) -> Result<()> {
        match self.remove(handle) {
            Ok(mut transaction) => {
                transaction.stop();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(%handle, "stop request for a stale transaction ignored");
                Err(e)
            }
        }
    }
}
