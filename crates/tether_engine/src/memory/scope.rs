//! The API registered programs are written against.
//!
//! A [`Scope`] is one activation: a `this` value, positional arguments and a
//! current line. Every operation is a safe point where a pending termination
//! request is honoured.

use std::cell::Cell;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tether_types::{ReturnKind, ScriptException, ValueKind};

use crate::engine::HostDispatch;
use crate::error::EngineError;
use crate::memory::IsolateState;
use crate::memory::heap::{FunctionBody, Local, SlotKind};

/// Body of a registered script or of a function created from one.
pub type Program = Arc<dyn Fn(&Scope<'_>) -> Result<Local, Throw> + Send + Sync>;

/// Source text and origin of the script a program belongs to.
#[derive(Debug)]
pub(crate) struct ScriptInfo {
    pub name: String,
    pub line_offset: u32,
    pub source: String,
}

impl ScriptInfo {
    pub fn new(name: &str, line_offset: u32, source: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            line_offset,
            source: source.to_string(),
        })
    }

    pub fn native() -> Arc<Self> {
        Self::new("native", 0, "")
    }

    /// 1-based line of the source, empty when out of range.
    pub fn line(&self, line: u32) -> &str {
        self.source
            .lines()
            .nth(line.saturating_sub(1) as usize)
            .unwrap_or("")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Throw
// ─────────────────────────────────────────────────────────────────────────────

/// A value thrown by script, unwinding through `?`.
#[derive(Clone)]
pub struct Throw {
    value: Local,
    message: String,
    line: u32,
    script: Option<Arc<ScriptInfo>>,
    cause: Option<Arc<dyn StdError + Send + Sync>>,
    terminated: bool,
}

impl Throw {
    fn termination() -> Self {
        Self {
            value: Local::Undefined,
            message: "Execution terminated".to_string(),
            line: 0,
            script: None,
            cause: None,
            terminated: true,
        }
    }

    /// The thrown value, for programs that catch.
    pub fn value(&self) -> &Local {
        &self.value
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Terminations cannot be caught; programs should propagate them.
    pub fn is_termination(&self) -> bool {
        self.terminated
    }

    pub(crate) fn into_engine_error(self, fallback: &Arc<ScriptInfo>) -> EngineError {
        if self.terminated {
            return EngineError::Terminated;
        }
        let script = self.script.as_ref().unwrap_or(fallback);
        let line = self.line.max(1);
        let source_line = script.line(line);
        let start = (source_line.len() - source_line.trim_start().len()) as u32;
        let line_number = script.line_offset + line;

        let mut exception = ScriptException::execution(&script.name, line_number, self.message.clone())
            .with_source_line(source_line, start, source_line.len() as u32)
            .with_stack_trace(format!("{}\n    at {}:{}", self.message, script.name, line_number));
        if let Some(cause) = self.cause {
            exception = exception.with_cause(cause);
        }
        EngineError::Script(exception)
    }
}

impl fmt::Debug for Throw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throw")
            .field("message", &self.message)
            .field("line", &self.line)
            .field("terminated", &self.terminated)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scope
// ─────────────────────────────────────────────────────────────────────────────

pub struct Scope<'a> {
    state: &'a IsolateState,
    host: &'a dyn HostDispatch,
    script: Arc<ScriptInfo>,
    this: Local,
    args: Vec<Local>,
    line: Cell<u32>,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(
        state: &'a IsolateState,
        host: &'a dyn HostDispatch,
        script: Arc<ScriptInfo>,
        this: Local,
        args: Vec<Local>,
    ) -> Self {
        Self {
            state,
            host,
            script,
            this,
            args,
            line: Cell::new(1),
        }
    }

    /// Safe point. Fails once termination has been requested.
    pub fn check(&self) -> Result<(), Throw> {
        if self.state.terminating.load(Ordering::SeqCst) {
            Err(Throw::termination())
        } else {
            Ok(())
        }
    }

    /// Line (1-based, relative to the script) reported for subsequent throws.
    pub fn set_line(&self, line: u32) {
        self.line.set(line.max(1));
    }

    pub fn line(&self) -> u32 {
        self.line.get()
    }

    pub fn this(&self) -> Local {
        self.this.clone()
    }

    pub fn args(&self) -> &[Local] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Local {
        self.args.get(index).cloned().unwrap_or(Local::Undefined)
    }

    pub fn global(&self) -> Local {
        Local::Ref(self.state.heap.lock().global)
    }

    // ── properties ───────────────────────────────────────────────────────────

    pub fn get(&self, target: &Local, key: &str) -> Result<Local, Throw> {
        self.check()?;
        match target {
            Local::Ref(r) => Ok(self.state.heap.lock().get(*r, key)),
            Local::Undefined | Local::Null => Err(self.type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                self.display(target),
                key
            ))),
            Local::String(s) if key == "length" => Ok(Local::Integer(s.chars().count() as i32)),
            _ => Ok(Local::Undefined),
        }
    }

    pub fn has(&self, target: &Local, key: &str) -> bool {
        match target {
            Local::Ref(r) => self.state.heap.lock().has(*r, key),
            _ => false,
        }
    }

    /// Global variable read; unknown names are a `ReferenceError`.
    pub fn get_global(&self, name: &str) -> Result<Local, Throw> {
        let global = self.global();
        if !self.has(&global, name) {
            return Err(self.reference_error(format!("{} is not defined", name)));
        }
        self.get(&global, name)
    }

    pub fn set(&self, target: &Local, key: &str, value: Local) -> Result<(), Throw> {
        self.check()?;
        match target {
            Local::Ref(r) => {
                self.state.heap.lock().set(*r, key, value);
                Ok(())
            }
            Local::Undefined | Local::Null => Err(self.type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                self.display(target),
                key
            ))),
            _ => Ok(()),
        }
    }

    pub fn set_global(&self, name: &str, value: Local) -> Result<(), Throw> {
        let global = self.global();
        self.set(&global, name, value)
    }

    pub fn keys(&self, target: &Local) -> Result<Vec<String>, Throw> {
        self.check()?;
        Ok(match target {
            Local::Ref(r) => self.state.heap.lock().keys(*r),
            _ => Vec::new(),
        })
    }

    // ── allocation ───────────────────────────────────────────────────────────

    pub fn new_object(&self) -> Local {
        Local::Ref(self.state.heap.lock().alloc(SlotKind::Object))
    }

    pub fn new_array(&self, items: Vec<Local>) -> Local {
        let mut heap = self.state.heap.lock();
        let array = heap.alloc(SlotKind::Array);
        if let Some(slot) = heap.slot_mut(array) {
            slot.elements = items;
        }
        Local::Ref(array)
    }

    /// A script function with its own `prototype` object.
    pub fn new_function<F>(&self, body: F) -> Local
    where
        F: Fn(&Scope<'_>) -> Result<Local, Throw> + Send + Sync + 'static,
    {
        let mut heap = self.state.heap.lock();
        let function = heap.alloc(SlotKind::Function(FunctionBody::Program {
            body: Arc::new(body),
            script: self.script.clone(),
        }));
        let prototype = heap.alloc(SlotKind::Object);
        heap.set(function, "prototype", Local::Ref(prototype));
        Local::Ref(function)
    }

    /// A value the host cannot classify, like a symbol.
    pub fn new_opaque(&self) -> Local {
        Local::Ref(self.state.heap.lock().alloc(SlotKind::Opaque))
    }

    /// Build script values from JSON.
    pub fn import_json(&self, value: &serde_json::Value) -> Local {
        match value {
            serde_json::Value::Null => Local::Null,
            serde_json::Value::Bool(b) => Local::Boolean(*b),
            serde_json::Value::Number(n) => Local::number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Local::String(s.clone()),
            serde_json::Value::Array(items) => {
                let items = items.iter().map(|v| self.import_json(v)).collect();
                self.new_array(items)
            }
            serde_json::Value::Object(map) => {
                let object = self.new_object();
                if let Local::Ref(r) = object {
                    for (k, v) in map {
                        let v = self.import_json(v);
                        self.state.heap.lock().set(r, k, v);
                    }
                }
                object
            }
        }
    }

    // ── arrays ───────────────────────────────────────────────────────────────

    pub fn element(&self, array: &Local, index: usize) -> Result<Local, Throw> {
        self.check()?;
        match array {
            Local::Ref(r) => Ok(self.state.heap.lock().element(*r, index)),
            _ => Err(self.type_error(format!("{} is not an array", self.display(array)))),
        }
    }

    pub fn push(&self, array: &Local, value: Local) -> Result<(), Throw> {
        self.check()?;
        match array {
            Local::Ref(r) if self.kind_of(array) == ValueKind::Array => {
                self.state.heap.lock().push(*r, value);
                Ok(())
            }
            _ => Err(self.type_error(format!("{} is not an array", self.display(array)))),
        }
    }

    pub fn length(&self, array: &Local) -> Result<usize, Throw> {
        self.check()?;
        match array {
            Local::Ref(r) => Ok(self.state.heap.lock().length(*r)),
            _ => Err(self.type_error(format!("{} is not an array", self.display(array)))),
        }
    }

    // ── inspection ───────────────────────────────────────────────────────────

    pub fn kind_of(&self, value: &Local) -> ValueKind {
        match value {
            Local::Undefined => ValueKind::Undefined,
            Local::Null => ValueKind::Null,
            Local::Boolean(_) => ValueKind::Boolean,
            Local::Integer(_) => ValueKind::Integer,
            Local::Double(_) => ValueKind::Double,
            Local::String(_) => ValueKind::String,
            Local::Ref(r) => self.state.heap.lock().kind(*r),
        }
    }

    pub fn strict_equals(&self, a: &Local, b: &Local) -> bool {
        match (a, b) {
            (Local::Integer(x), Local::Double(y)) | (Local::Double(y), Local::Integer(x)) => {
                *x as f64 == *y
            }
            _ => a == b,
        }
    }

    /// String conversion in the spirit of `String(value)`.
    pub fn display(&self, value: &Local) -> String {
        match value {
            Local::Undefined => "undefined".to_string(),
            Local::Null => "null".to_string(),
            Local::Boolean(b) => b.to_string(),
            Local::Integer(i) => i.to_string(),
            Local::Double(d) => format_double(*d),
            Local::String(s) => s.clone(),
            Local::Ref(r) => {
                let heap = self.state.heap.lock();
                match heap.kind(*r) {
                    ValueKind::Function => "function".to_string(),
                    ValueKind::Array => {
                        let len = heap.length(*r);
                        let items: Vec<Local> = (0..len).map(|i| heap.element(*r, i)).collect();
                        drop(heap);
                        items
                            .iter()
                            .map(|v| if v.is_nullish() { String::new() } else { self.display(v) })
                            .collect::<Vec<_>>()
                            .join(",")
                    }
                    ValueKind::Unsupported => "[opaque]".to_string(),
                    _ => match (heap.get(*r, "name"), heap.get(*r, "message")) {
                        (Local::String(name), Local::String(message)) => format!("{}: {}", name, message),
                        _ => "[object Object]".to_string(),
                    },
                }
            }
        }
    }

    // ── calls ────────────────────────────────────────────────────────────────

    pub fn call(&self, function: &Local, this: Local, args: Vec<Local>) -> Result<Local, Throw> {
        self.check()?;
        let body = match function {
            Local::Ref(r) => self.state.heap.lock().function_body(*r),
            _ => None,
        };
        let Some(body) = body else {
            return Err(self.type_error(format!("{} is not a function", self.display(function))));
        };
        invoke_body(self.state, self.host, body, this, args, Some((&self.script, self.line())))
    }

    /// `target.name(...args)`
    pub fn call_method(&self, target: &Local, name: &str, args: Vec<Local>) -> Result<Local, Throw> {
        let function = self.get(target, name)?;
        if self.kind_of(&function) != ValueKind::Function {
            return Err(self.type_error(format!("{} is not a function", name)));
        }
        self.call(&function, target.clone(), args)
    }

    /// `name(...args)` for a global function.
    pub fn call_global(&self, name: &str, args: Vec<Local>) -> Result<Local, Throw> {
        let function = self.get_global(name)?;
        if self.kind_of(&function) != ValueKind::Function {
            return Err(self.type_error(format!("{} is not a function", name)));
        }
        self.call(&function, Local::Undefined, args)
    }

    /// `new constructor(...args)`
    pub fn construct(&self, constructor: &Local, args: Vec<Local>) -> Result<Local, Throw> {
        self.check()?;
        let instance = {
            let mut heap = self.state.heap.lock();
            let target = constructor.as_object().filter(|r| heap.function_body(*r).is_some());
            match target {
                Some(r) => {
                    let prototype = heap.get(r, "prototype").as_object();
                    let instance = heap.alloc(SlotKind::Object);
                    if let Some(slot) = heap.slot_mut(instance) {
                        slot.prototype = prototype;
                    }
                    Some(Local::Ref(instance))
                }
                None => None,
            }
        };
        let Some(instance) = instance else {
            return Err(self.type_error(format!("{} is not a constructor", self.display(constructor))));
        };
        let result = self.call(constructor, instance.clone(), args)?;
        Ok(match self.kind_of(&result) {
            ValueKind::Object | ValueKind::Array | ValueKind::Function => result,
            _ => instance,
        })
    }

    // ── throwing ─────────────────────────────────────────────────────────────

    pub fn throw(&self, value: Local) -> Throw {
        Throw {
            message: self.display(&value),
            value,
            line: self.line(),
            script: Some(self.script.clone()),
            cause: None,
            terminated: false,
        }
    }

    pub fn throw_error(&self, message: impl Into<String>) -> Throw {
        self.throw_named("Error", message.into())
    }

    pub fn type_error(&self, message: impl Into<String>) -> Throw {
        self.throw_named("TypeError", message.into())
    }

    pub fn reference_error(&self, message: impl Into<String>) -> Throw {
        self.throw_named("ReferenceError", message.into())
    }

    fn throw_named(&self, name: &str, message: String) -> Throw {
        let error = error_object(self.state, name, &message);
        self.throw(error)
    }
}

fn error_object(state: &IsolateState, name: &str, message: &str) -> Local {
    let mut heap = state.heap.lock();
    let error = heap.alloc(SlotKind::Object);
    heap.set(error, "name", Local::string(name));
    heap.set(error, "message", Local::string(message));
    Local::Ref(error)
}

fn format_double(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        value.to_string()
    }
}

/// Run a function body. `site` is the calling script and line, used to place
/// errors raised by host callbacks.
pub(crate) fn invoke_body(
    state: &IsolateState,
    host: &dyn HostDispatch,
    body: FunctionBody,
    this: Local,
    args: Vec<Local>,
    site: Option<(&Arc<ScriptInfo>, u32)>,
) -> Result<Local, Throw> {
    if state.terminating.load(Ordering::SeqCst) {
        return Err(Throw::termination());
    }
    match body {
        FunctionBody::Program { body, script } => {
            let scope = Scope::new(state, host, script, this, args);
            body(&scope)
        }
        FunctionBody::Host { callback, returns } => {
            let (receiver, exported) = {
                let mut heap = state.heap.lock();
                let receiver = if this.is_nullish() { Local::Ref(heap.global) } else { this };
                let receiver = heap.export(&receiver);
                let exported: Vec<_> = args.iter().map(|a| heap.export(a)).collect();
                (receiver, exported)
            };
            tracing::trace!("[memory:{}] dispatch {}", state.id, callback);

            let fault = match host.dispatch(callback, receiver, exported) {
                Ok(value) => match state.heap.lock().import_owned(value) {
                    Ok(_) if returns == ReturnKind::Void => return Ok(Local::Undefined),
                    Ok(local) => return Ok(local),
                    Err(err) => (err.to_string(), None),
                },
                Err(fault) => (fault.message, fault.cause),
            };
            if state.terminating.load(Ordering::SeqCst) {
                return Err(Throw::termination());
            }

            let (message, cause) = fault;
            let value = error_object(state, "Error", &message);
            Err(Throw {
                value,
                message: format!("Error: {}", message),
                line: site.map(|(_, line)| line).unwrap_or(1),
                script: site.map(|(script, _)| script.clone()),
                cause,
                terminated: false,
            })
        }
    }
}
