//! Bulk ownership of handles.
//!
//! A [`MemoryManager`] records every handle created in its runtime while it
//! is active and releases the survivors in one go.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tether_engine::NativeId;

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::runtime::{ReferenceHandler, Runtime};

#[derive(Default)]
struct Tracker {
    handles: Mutex<HashMap<NativeId, Handle>>,
}

impl ReferenceHandler for Tracker {
    fn handle_created(&self, handle: &Handle) {
        if let Some(id) = handle.native_id() {
            self.handles.lock().insert(id, handle.clone());
        }
    }

    fn handle_disposed(&self, id: NativeId) {
        // dropped outside the lock, dropping a handle can re-enter
        let removed = self.handles.lock().remove(&id);
        drop(removed);
    }
}

pub struct MemoryManager {
    runtime: Runtime,
    tracker: Arc<Tracker>,
    registration: u64,
    released: AtomicBool,
}

impl MemoryManager {
    /// Start tracking handles created in `runtime` from now on.
    pub fn new(runtime: &Runtime) -> Result<Self> {
        runtime.locker().check_thread()?;
        if runtime.is_released() {
            return Err(Error::Released("Runtime"));
        }
        let tracker = Arc::new(Tracker::default());
        let registration = runtime.add_reference_handler(tracker.clone());
        Ok(Self {
            runtime: runtime.clone(),
            tracker,
            registration,
            released: AtomicBool::new(false),
        })
    }

    fn check(&self) -> Result<()> {
        if self.released.load(Ordering::SeqCst) {
            return Err(Error::Released("MemoryManager"));
        }
        self.runtime.locker().check_thread()
    }

    /// Tracked handles that are still alive.
    pub fn object_reference_count(&self) -> Result<usize> {
        self.check()?;
        Ok(self.tracker.handles.lock().len())
    }

    /// Stop tracking `handle` so it outlives [`release`](Self::release).
    pub fn persist(&self, handle: &Handle) -> Result<()> {
        self.check()?;
        if let Some(id) = handle.native_id() {
            let removed = self.tracker.handles.lock().remove(&id);
            drop(removed);
        }
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Release every tracked handle and stop tracking.
    pub fn release(&self) -> Result<()> {
        self.check()?;
        self.runtime.remove_reference_handler(self.registration);
        self.released.store(true, Ordering::SeqCst);

        let handles: Vec<Handle> = self.tracker.handles.lock().drain().map(|(_, h)| h).collect();
        tracing::trace!(
            "[runtime:{}] memory manager releasing {} handle(s)",
            self.runtime.name(),
            handles.len()
        );
        let mut first_error = None;
        for handle in handles {
            if let Err(e) = handle.release() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        if !self.is_released() {
            self.runtime.remove_reference_handler(self.registration);
        }
    }
}
