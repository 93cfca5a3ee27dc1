//! Commands sent to the worker thread.

use tether_engine::ScriptOrigin;
use tokio::sync::oneshot;

use crate::error::WorkerError;
use crate::runtime::Runtime;

/// Work shipped to the worker as a closure over its runtime.
pub(crate) type Job = Box<dyn FnOnce(&Runtime) + Send>;

pub(crate) enum WorkerCommand {
    /// Run a script and reply with its result as JSON.
    Execute {
        source: String,
        origin: ScriptOrigin,
        reply: oneshot::Sender<Result<serde_json::Value, WorkerError>>,
    },

    /// Run arbitrary host code on the worker's runtime. The job carries its
    /// own reply channel.
    Run { job: Job },
}
