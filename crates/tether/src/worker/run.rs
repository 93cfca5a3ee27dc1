//! The worker thread's command loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tether_engine::{Engine, ScriptOrigin};
use tokio::sync::{mpsc, watch};

use crate::config::RuntimeConfig;
use crate::error::{Error, WorkerError};
use crate::runtime::{Runtime, TerminationHandle};
use crate::utils::object_utils;
use crate::worker::command::WorkerCommand;

pub(crate) async fn run_worker(
    engine: Arc<dyn Engine>,
    config: RuntimeConfig,
    terminated: Arc<AtomicBool>,
    mut cmd_rx: mpsc::Receiver<WorkerCommand>,
    mut shutdown_rx: watch::Receiver<bool>,
    init_tx: std::sync::mpsc::SyncSender<Result<TerminationHandle, String>>,
) -> Result<(), WorkerError> {
    let runtime = match Runtime::with_engine(engine, config) {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = init_tx.send(Err(e.to_string()));
            return Err(WorkerError::Init(e.to_string()));
        }
    };
    let name = runtime.name().to_string();
    let _ = init_tx.send(Ok(runtime.termination_handle()));

    loop {
        if *shutdown_rx.borrow() || terminated.load(Ordering::SeqCst) {
            tracing::debug!("[worker:{}] shutdown signal received", name);
            break;
        }

        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::debug!("[worker:{}] shutting down", name);
                    break;
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(cmd) => handle_command(&runtime, cmd),
                    None => {
                        tracing::debug!("[worker:{}] command channel closed", name);
                        break;
                    }
                }
            }
        }
    }

    // outstanding handles die with the worker
    runtime.release_with(false).map_err(|e| WorkerError::Script(e.to_string()))
}

fn handle_command(runtime: &Runtime, cmd: WorkerCommand) {
    match cmd {
        WorkerCommand::Execute { source, origin, reply } => {
            let result = execute(runtime, &source, &origin);
            let _ = reply.send(result);
        }
        WorkerCommand::Run { job } => job(runtime),
    }
}

fn execute(runtime: &Runtime, source: &str, origin: &ScriptOrigin) -> Result<serde_json::Value, WorkerError> {
    let value = runtime.execute_script_at(source, origin).map_err(script_error)?;
    let json = object_utils::to_json(&value);
    value.release().map_err(script_error)?;
    json.map_err(script_error)
}

pub(crate) fn script_error(err: Error) -> WorkerError {
    match err {
        Error::Terminated => WorkerError::Terminated,
        other => WorkerError::Script(other.to_string()),
    }
}
