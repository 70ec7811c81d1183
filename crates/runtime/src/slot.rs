//! Non-reentrant operation lock.
//!
//! An [`OperationSlot`] holds at most one in-flight operation. Claiming returns
//! an RAII guard that frees the slot when dropped, so every exit path (success,
//! error, cancellation, panic) releases it. A second claim while the slot is
//! held fails immediately and reports what is running; it never queues.

use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct OperationSlot<T: Copy> {
    current: Mutex<Option<T>>,
}

impl<T: Copy> OperationSlot<T> {
    pub fn new() -> Self {
        Self { current: Mutex::new(None) }
    }

    /// Claims the slot for `operation`.
    ///
    /// Returns `Err(running)` with the operation currently holding the slot.
    pub fn try_claim(&self, operation: T) -> Result<SlotGuard<'_, T>, T> {
        let mut current = self.lock();
        if let Some(running) = *current {
            return Err(running);
        }
        *current = Some(operation);
        Ok(SlotGuard { slot: self, operation })
    }

    pub fn current(&self) -> Option<T> {
        *self.lock()
    }

    pub fn is_busy(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        // The slot only stores a Copy value; a poisoned lock still holds a valid one.
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Held while an operation runs. Dropping it frees the slot.
#[derive(Debug)]
pub struct SlotGuard<'a, T: Copy> {
    slot: &'a OperationSlot<T>,
    operation: T,
}

impl<T: Copy> SlotGuard<'_, T> {
    pub fn operation(&self) -> T {
        self.operation
    }
}

impl<T: Copy> Drop for SlotGuard<'_, T> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Install,
        Stop,
    }

    #[test]
    fn second_claim_fails_with_running_operation() {
        let slot = OperationSlot::new();
        let guard = slot.try_claim(Op::Install).unwrap();
        assert_eq!(guard.operation(), Op::Install);
        assert_eq!(slot.try_claim(Op::Stop).unwrap_err(), Op::Install);
        assert_eq!(slot.current(), Some(Op::Install));
    }

    #[test]
    fn dropping_the_guard_frees_the_slot() {
        let slot = OperationSlot::new();
        {
            let _guard = slot.try_claim(Op::Install).unwrap();
            assert!(slot.is_busy());
        }
        assert!(!slot.is_busy());
        assert!(slot.try_claim(Op::Stop).is_ok());
    }

    #[test]
    fn slot_is_released_when_the_holder_panics() {
        let slot = std::sync::Arc::new(OperationSlot::new());
        let cloned = slot.clone();
        let result = std::thread::spawn(move || {
            let _guard = cloned.try_claim(Op::Install).unwrap();
            panic!("boom");
        })
        .join();
        assert!(result.is_err());
        assert!(!slot.is_busy());
    }
}
