//! Worker spawn functions.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;

use parking_lot::Mutex;
use tether_engine::{Engine, MemoryEngine};
use tokio::sync::{mpsc, watch};

use crate::config::RuntimeConfig;
use crate::error::WorkerError;
use crate::runtime::TerminationHandle;
use crate::worker::handle::ScriptWorker;
use crate::worker::run::run_worker;

/// Spawn a worker whose runtime runs on a fresh [`MemoryEngine`].
pub fn spawn_worker(config: RuntimeConfig) -> Result<ScriptWorker, WorkerError> {
    spawn_worker_with_engine(Arc::new(MemoryEngine::new()), config)
}

/// Spawn a worker on `engine`. Returns once the runtime exists on the
/// worker thread.
pub fn spawn_worker_with_engine(engine: Arc<dyn Engine>, config: RuntimeConfig) -> Result<ScriptWorker, WorkerError> {
    let name = config.name.clone();
    tracing::debug!("[worker:{}] starting", name);

    let terminated = Arc::new(AtomicBool::new(false));
    let terminated_clone = terminated.clone();

    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (init_tx, init_rx) = std::sync::mpsc::sync_channel::<Result<TerminationHandle, String>>(1);

    let thread_name = name.clone();
    let thread_handle = thread::Builder::new()
        .name(name.clone())
        .spawn(move || -> Result<(), WorkerError> {
            tracing::debug!("[worker:{}] thread started", thread_name);

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(WorkerError::SpawnFailed)?;

            let result = rt.block_on(run_worker(
                engine,
                config,
                terminated_clone,
                cmd_rx,
                shutdown_rx,
                init_tx,
            ));

            rt.shutdown_background();
            tracing::debug!("[worker:{}] thread exiting", thread_name);
            result
        })?;

    let termination = match init_rx.recv() {
        Ok(Ok(termination)) => termination,
        Ok(Err(message)) => {
            let _ = thread_handle.join();
            return Err(WorkerError::Init(message));
        }
        Err(_) => {
            // the thread died before reporting, collect its error if any
            return match thread_handle.join() {
                Ok(Err(e)) => Err(e),
                Ok(Ok(())) => Err(WorkerError::ChannelClosed),
                Err(_) => Err(WorkerError::ThreadPanic),
            };
        }
    };

    tracing::debug!("[worker:{}] ready", name);

    Ok(ScriptWorker {
        name,
        cmd_tx,
        shutdown_tx,
        terminated,
        termination,
        thread_handle: Mutex::new(Some(thread_handle)),
    })
}
