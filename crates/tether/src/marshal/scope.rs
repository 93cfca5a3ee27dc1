use crate::error::Result;
use crate::handle::Handle;
use crate::value::Value;

/// Collects handles that must be released together, whatever the exit path.
///
/// Every handle added is released when the scope is dropped, which is how
/// marshalling guarantees intermediate references never leak on error.
#[derive(Debug, Default)]
pub struct HandleScope {
    handles: Vec<Handle>,
}

impl HandleScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `handle` and hand back a clone sharing the same reference.
    pub fn add(&mut self, handle: Handle) -> Handle {
        self.handles.push(handle.clone());
        handle
    }

    /// Track the handle held by `value`, if any.
    pub fn adopt(&mut self, value: Value) -> Value {
        if let Value::Handle(handle) = &value {
            self.handles.push(handle.clone());
        }
        value
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Release everything now, reporting the first failure.
    pub fn release(mut self) -> Result<()> {
        let mut first = Ok(());
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.release() {
                if first.is_ok() {
                    first = Err(e);
                }
            }
        }
        first
    }
}

impl Drop for HandleScope {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.release() {
                tracing::warn!("[marshal] scope release failed: {}", e);
            }
        }
    }
}
