//! Sharing one runtime between threads.

use serde::Serialize;

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::locker::RwGate;
use crate::runtime::Runtime;

/// Point-in-time view of a runtime, safe to read from any thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeDiagnostics {
    pub name: String,
    pub released: bool,
    pub object_references: usize,
    /// Whether some thread currently holds the locker.
    pub owned: bool,
    pub callbacks: usize,
    pub bridged_objects: usize,
}

/// A runtime whose locker is free at rest.
///
/// [`run`](Self::run) serialises drivers through the writer side of an
/// [`RwGate`] and holds the locker for the duration of the closure.
/// [`observe`](Self::observe) takes the reader side, so many threads can
/// inspect diagnostics at once but never while a driver is running.
pub struct ConcurrentRuntime {
    runtime: Runtime,
    gate: RwGate,
}

impl ConcurrentRuntime {
    pub fn new() -> Result<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        Self::from_runtime(Runtime::with_config(config)?)
    }

    /// Take over a runtime owned by the calling thread.
    pub fn from_runtime(runtime: Runtime) -> Result<Self> {
        runtime.locker().release()?;
        Ok(Self {
            runtime,
            gate: RwGate::new(),
        })
    }

    /// Drive the runtime from the calling thread.
    pub fn run<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Runtime) -> Result<R>,
    {
        let _writer = self.gate.write();
        let _locked = self.runtime.locker().guard()?;
        f(&self.runtime)
    }

    pub fn observe<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&RuntimeDiagnostics) -> R,
    {
        let _reader = self.gate.read();
        f(&self.runtime.diagnostics())
    }

    pub fn name(&self) -> &str {
        self.runtime.name()
    }

    /// Release the runtime from the calling thread.
    pub fn release(self) -> Result<()> {
        let _writer = self.gate.write();
        self.runtime.locker().acquire()?;
        let result = self.runtime.release();
        if result.is_err() {
            let _ = self.runtime.locker().release();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::error::Error;
    use crate::object::ObjectLike;

    #[test]
    fn test_run_from_many_threads() {
        let shared = Arc::new(ConcurrentRuntime::new().unwrap());
        shared
            .run(|rt| rt.set("count", 0))
            .unwrap();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        shared
                            .run(|rt| {
                                let n = rt.get_integer("count")?;
                                rt.set("count", n + 1)
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(shared.run(|rt| rt.get_integer("count")).unwrap(), 40);
        assert!(!shared.observe(|d| d.owned));

        let shared = Arc::try_unwrap(shared).ok().unwrap();
        shared.release().unwrap();
    }

    #[test]
    fn test_lock_released_on_error() {
        let shared = ConcurrentRuntime::new().unwrap();
        let failed: Result<()> = shared.run(|_| Err(Error::argument("boom")));
        assert!(failed.is_err());
        assert!(!shared.observe(|d| d.owned));
        shared.release().unwrap();
    }

    #[test]
    fn test_observe_reports_counts() {
        let shared = ConcurrentRuntime::with_config(RuntimeConfig::new("observed")).unwrap();
        let handle = shared.run(|rt| rt.new_object()).unwrap();

        let diagnostics = shared.observe(|d| d.clone());
        assert_eq!(diagnostics.name, "observed");
        assert_eq!(diagnostics.object_references, 1);
        assert!(!diagnostics.released);

        shared.run(|_| handle.release()).unwrap();
        shared.release().unwrap();
    }

    #[test]
    fn test_runtime_is_not_usable_outside_run() {
        let shared = ConcurrentRuntime::new().unwrap();
        let leaked = shared.run(|rt| Ok(rt.clone())).unwrap();
        assert!(matches!(leaked.new_object(), Err(Error::ThreadViolation)));
        shared.release().unwrap();
    }
}
