//! The caller's side of a worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::Mutex;
use tether_engine::ScriptOrigin;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{Result as RuntimeResult, WorkerError};
use crate::runtime::{Runtime, TerminationHandle};
use crate::worker::command::WorkerCommand;
use crate::worker::run::script_error;

/// Handle to a runtime living on its own thread.
///
/// Dropping the handle terminates the worker and waits for its thread.
pub struct ScriptWorker {
    pub(crate) name: String,
    pub(crate) cmd_tx: mpsc::Sender<WorkerCommand>,
    pub(crate) shutdown_tx: watch::Sender<bool>,
    pub(crate) terminated: Arc<AtomicBool>,
    pub(crate) termination: TerminationHandle,
    pub(crate) thread_handle: Mutex<Option<thread::JoinHandle<Result<(), WorkerError>>>>,
}

impl ScriptWorker {
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn send_command<T, F>(&self, make_cmd: F) -> Result<T, WorkerError>
    where
        F: FnOnce(oneshot::Sender<Result<T, WorkerError>>) -> WorkerCommand,
    {
        if self.is_terminated() {
            return Err(WorkerError::Terminated);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(make_cmd(reply_tx))
            .await
            .map_err(|_| WorkerError::ChannelClosed)?;

        reply_rx.await.map_err(|_| WorkerError::ChannelClosed)?
    }

    fn send_command_blocking<T, F>(&self, make_cmd: F) -> Result<T, WorkerError>
    where
        F: FnOnce(oneshot::Sender<Result<T, WorkerError>>) -> WorkerCommand,
    {
        if self.is_terminated() {
            return Err(WorkerError::Terminated);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .blocking_send(make_cmd(reply_tx))
            .map_err(|_| WorkerError::ChannelClosed)?;

        reply_rx.blocking_recv().map_err(|_| WorkerError::ChannelClosed)?
    }

    /// Execute a script and return its result as JSON.
    pub async fn execute(&self, source: &str) -> Result<serde_json::Value, WorkerError> {
        self.execute_at(source, ScriptOrigin::default()).await
    }

    pub async fn execute_at(&self, source: &str, origin: ScriptOrigin) -> Result<serde_json::Value, WorkerError> {
        let source = source.to_string();
        self.send_command(|reply| WorkerCommand::Execute { source, origin, reply })
            .await
    }

    /// Synchronous [`execute`](Self::execute). Must not be called from
    /// inside an async context.
    pub fn execute_blocking(&self, source: &str) -> Result<serde_json::Value, WorkerError> {
        let source = source.to_string();
        self.send_command_blocking(|reply| WorkerCommand::Execute {
            source,
            origin: ScriptOrigin::default(),
            reply,
        })
    }

    /// Run `f` on the worker thread with its runtime.
    pub async fn run<F, R>(&self, f: F) -> Result<R, WorkerError>
    where
        F: FnOnce(&Runtime) -> RuntimeResult<R> + Send + 'static,
        R: Send + 'static,
    {
        self.send_command(|reply| WorkerCommand::Run {
            job: Box::new(move |runtime| {
                let _ = reply.send(f(runtime).map_err(script_error));
            }),
        })
        .await
    }

    /// Stop the running script, if any, and shut the worker down.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("[worker:{}] terminate requested", self.name);
        let _ = self.shutdown_tx.send(true);
        self.termination.terminate();
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Shut down without interrupting the running command, then wait for
    /// the thread.
    pub fn join(self) -> Result<(), WorkerError> {
        self.terminated.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.thread_handle.lock().take() {
            handle.join().map_err(|_| WorkerError::ThreadPanic)??;
        }
        Ok(())
    }
}

impl Drop for ScriptWorker {
    fn drop(&mut self) {
        self.terminate();
        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for ScriptWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptWorker")
            .field("name", &self.name)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tether_engine::{Engine, MemoryEngine};

    use super::*;
    use crate::config::RuntimeConfig;
    use crate::object::ObjectLike;
    use crate::worker::{spawn_worker, spawn_worker_with_engine};

    #[tokio::test]
    async fn test_execute_returns_json() {
        let worker = spawn_worker(RuntimeConfig::new("json")).unwrap();
        let value = worker.execute(r#"{"a": [1, 2.5], "b": null}"#).await.unwrap();
        assert_eq!(value, json!({"a": [1, 2.5], "b": null}));
        worker.join().unwrap();
    }

    #[tokio::test]
    async fn test_script_errors_are_reported() {
        let worker = spawn_worker(RuntimeConfig::new("errors")).unwrap();
        let err = worker.execute("missing.value").await.unwrap_err();
        match err {
            WorkerError::Script(message) => assert!(message.contains("missing is not defined")),
            other => panic!("unexpected error: {other:?}"),
        }
        // the worker survives a failed script
        assert_eq!(worker.execute("42").await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_run_on_worker_runtime() {
        let worker = spawn_worker(RuntimeConfig::new("jobs")).unwrap();
        let caller = thread::current().id();

        let (value, on_worker) = worker
            .run(move |rt| {
                rt.set("x", 5)?;
                Ok((rt.get_integer("x")?, thread::current().id() != caller))
            })
            .await
            .unwrap();
        assert_eq!(value, 5);
        assert!(on_worker);

        assert_eq!(worker.execute("x").await.unwrap(), json!(5));
    }

    #[tokio::test]
    async fn test_terminate_stops_a_running_script() {
        let engine = Arc::new(MemoryEngine::new());
        engine.define_script("while (true) {}", |scope| loop {
            scope.check()?;
            thread::yield_now();
        });
        let engine: Arc<dyn Engine> = engine;
        let worker = Arc::new(spawn_worker_with_engine(engine, RuntimeConfig::new("spin")).unwrap());

        let running = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.execute("while (true) {}").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.terminate();

        let result = running.await.unwrap();
        assert!(matches!(result, Err(WorkerError::Terminated | WorkerError::ChannelClosed)));
        assert!(worker.is_terminated());
        assert!(matches!(worker.execute("1").await, Err(WorkerError::Terminated)));
    }

    #[test]
    fn test_blocking_execute() {
        let worker = spawn_worker(RuntimeConfig::new("blocking")).unwrap();
        assert_eq!(worker.execute_blocking("[true]").unwrap(), json!([true]));
        // async and blocking callers share one command queue
        assert_eq!(tokio_test::block_on(worker.execute("\"ok\"")).unwrap(), json!("ok"));
        drop(worker);
    }

    #[test]
    fn test_init_failure_is_reported() {
        let config = RuntimeConfig {
            name: String::new(),
            ..RuntimeConfig::default()
        };
        assert!(matches!(spawn_worker(config), Err(WorkerError::Init(_))));
    }

    #[tokio::test]
    async fn test_terminated_worker_rejects_run() {
        let worker = spawn_worker(RuntimeConfig::new("closed")).unwrap();
        worker.terminate();
        let result = worker.run(|rt| rt.new_object().map(|_| ())).await;
        assert!(matches!(result, Err(WorkerError::Terminated)));
    }
}
