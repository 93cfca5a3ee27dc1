//! Thread ownership of a runtime.
//!
//! [`Locker`] is the single-owner gate every runtime operation goes through.
//! [`RwGate`] is the reader/writer variant used where many threads observe a
//! runtime while one drives it.

use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Locker
// ─────────────────────────────────────────────────────────────────────────────

/// Records which thread may touch a runtime.
///
/// Acquiring twice from the owner is a no-op and a single `release` clears
/// ownership. Moving a runtime between threads means releasing on one and
/// acquiring on the other.
#[derive(Debug)]
pub struct Locker {
    owner: Mutex<Option<ThreadId>>,
    /// Only this thread may ever acquire, when set.
    pinned: Option<ThreadId>,
}

impl Locker {
    /// A locker owned by the calling thread.
    pub fn new() -> Self {
        Self {
            owner: Mutex::new(Some(thread::current().id())),
            pinned: None,
        }
    }

    /// A locker owned by, and never transferable away from, `thread`.
    pub fn pinned(thread: ThreadId) -> Self {
        Self {
            owner: Mutex::new(Some(thread)),
            pinned: Some(thread),
        }
    }

    pub fn acquire(&self) -> Result<()> {
        let current = thread::current().id();
        if self.pinned.is_some_and(|p| p != current) {
            return Err(Error::ThreadViolation);
        }
        let mut owner = self.owner.lock();
        match *owner {
            Some(thread) if thread != current => Err(Error::ThreadViolation),
            _ => {
                *owner = Some(current);
                Ok(())
            }
        }
    }

    pub fn release(&self) -> Result<()> {
        let mut owner = self.owner.lock();
        if *owner != Some(thread::current().id()) {
            return Err(Error::ThreadViolation);
        }
        *owner = None;
        Ok(())
    }

    /// Fails unless the calling thread holds the lock.
    pub fn check_thread(&self) -> Result<()> {
        if self.has_lock() {
            Ok(())
        } else {
            Err(Error::ThreadViolation)
        }
    }

    pub fn has_lock(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    pub fn owner(&self) -> Option<ThreadId> {
        *self.owner.lock()
    }

    /// Acquire for a scope. The lock is released on drop only if this guard
    /// was the one that took it.
    pub fn guard(&self) -> Result<LockerGuard<'_>> {
        let held = self.has_lock();
        self.acquire()?;
        Ok(LockerGuard {
            locker: self,
            acquired: !held,
        })
    }

    /// Drop ownership without a thread check. Only for teardown.
    pub(crate) fn clear(&self) {
        *self.owner.lock() = None;
    }
}

impl Default for Locker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LockerGuard<'a> {
    locker: &'a Locker,
    acquired: bool,
}

impl Drop for LockerGuard<'_> {
    fn drop(&mut self) {
        if self.acquired && self.locker.has_lock() {
            let _ = self.locker.release();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RwGate
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct GateState {
    readers: usize,
    writers: usize,
    write_requests: usize,
}

/// Reader/writer gate. A waiting writer blocks new readers; the writer
/// proceeds once current readers drain.
#[derive(Debug, Default)]
pub struct RwGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl RwGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> ReadGuard<'_> {
        let mut state = self.state.lock();
        while state.writers > 0 || state.write_requests > 0 {
            self.changed.wait(&mut state);
        }
        state.readers += 1;
        ReadGuard { gate: self }
    }

    pub fn write(&self) -> WriteGuard<'_> {
        let mut state = self.state.lock();
        state.write_requests += 1;
        while state.readers > 0 || state.writers > 0 {
            self.changed.wait(&mut state);
        }
        state.write_requests -= 1;
        state.writers += 1;
        WriteGuard { gate: self }
    }

    pub fn readers(&self) -> usize {
        self.state.lock().readers
    }

    pub fn pending_writers(&self) -> usize {
        self.state.lock().write_requests
    }
}

pub struct ReadGuard<'a> {
    gate: &'a RwGate,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.readers -= 1;
        self.gate.changed.notify_all();
    }
}

pub struct WriteGuard<'a> {
    gate: &'a RwGate,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.writers -= 1;
        self.gate.changed.notify_all();
    }
}
