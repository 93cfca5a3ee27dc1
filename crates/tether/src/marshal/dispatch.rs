//! The engine's way back into the host.

use std::error::Error as StdError;
use std::sync::Arc;

use tether_engine::{CallbackId, EngineValue, HostDispatch, HostFault};
use tether_types::ReturnKind;

use super::coerce::first_fit;
use super::convert::to_engine;
use super::registry::Target;
use super::{CallContext, HandleScope, MethodDescriptor};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::runtime::RuntimeInner;
use crate::value::{HostValue, Value};

impl HostDispatch for RuntimeInner {
    fn dispatch(
        &self,
        callback: CallbackId,
        receiver: EngineValue,
        args: Vec<EngineValue>,
    ) -> std::result::Result<EngineValue, HostFault> {
        // the scope releases the receiver and arguments on every path out
        let mut scope = HandleScope::new();
        let receiver = match scope.adopt(self.wrap(receiver)) {
            Value::Handle(handle) => handle,
            _ => Handle::undefined(),
        };
        let args: Vec<Value> = args.into_iter().map(|a| scope.adopt(self.wrap(a))).collect();

        let Some(descriptor) = self.callbacks.get(callback) else {
            return Err(HostFault::new(format!("Unknown host callback {}", callback)));
        };
        tracing::trace!(
            "[runtime:{}] callback {} with {} argument(s)",
            self.name(),
            descriptor.name(),
            args.len()
        );

        let ctx = CallContext::new(self.handle(), receiver, args, descriptor.name().to_string());
        let result = invoke(&self.arc(), &descriptor, &ctx)
            .and_then(|value| self.coerce_return(&descriptor, value).map_err(anyhow::Error::from));
        drop(ctx);

        result.map_err(|err| {
            tracing::debug!("[runtime:{}] callback {} failed: {}", self.name(), descriptor.name(), err);
            let message = err.to_string();
            let cause: Box<dyn StdError + Send + Sync> = err.into();
            HostFault::new(message).with_cause(Arc::from(cause))
        })
    }
}

/// Run a descriptor's body, selecting an overload when it has several.
pub(crate) fn invoke(runtime: &Arc<RuntimeInner>, descriptor: &MethodDescriptor, ctx: &CallContext) -> anyhow::Result<HostValue> {
    match &descriptor.target {
        Target::Raw(body) => body(ctx),
        Target::Overloads(overloads) => {
            let (overload, args, temps) = first_fit(runtime, ctx, overloads)?;
            let result = (overload.body)(ctx, args);
            drop(temps);
            result
        }
    }
}

impl RuntimeInner {
    /// Check a callback result against its declared kind and hand it to the
    /// engine. Void results are dropped without conversion.
    fn coerce_return(&self, descriptor: &MethodDescriptor, value: HostValue) -> Result<EngineValue> {
        let returns = descriptor.return_kind();
        if returns == ReturnKind::Void {
            return Ok(EngineValue::Undefined);
        }
        let mut temps = HandleScope::new();
        let converted = to_engine(self, &value, &mut temps)?;
        if !returns.accepts(converted.kind()) {
            return Err(Error::argument(format!(
                "{} is declared to return {} but returned {}",
                descriptor.name(),
                returns,
                converted.kind()
            )));
        }
        // the engine takes ownership of a returned reference
        match converted {
            EngineValue::Ref { id, kind } => {
                let owned = self.engine.create_twin(self.isolate, id)?;
                Ok(EngineValue::Ref { id: owned, kind })
            }
            other => Ok(other),
        }
    }
}
