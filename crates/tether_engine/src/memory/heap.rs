//! Slot heap backing one isolate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tether_types::{ReturnKind, ValueKind};

use crate::engine::{CallbackId, EngineValue, NativeId};
use crate::error::EngineError;
use crate::memory::scope::{Program, ScriptInfo};

// ─────────────────────────────────────────────────────────────────────────────
// Values
// ─────────────────────────────────────────────────────────────────────────────

/// Reference to a heap slot, only meaningful inside the isolate that made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(pub(crate) u64);

/// A value as programs see it.
#[derive(Debug, Clone, PartialEq)]
pub enum Local {
    Undefined,
    Null,
    Boolean(bool),
    Integer(i32),
    Double(f64),
    String(String),
    Ref(ObjectRef),
}

impl Local {
    /// Numbers with no fractional part that fit in 32 bits are integers.
    /// Negative zero stays a double.
    pub fn number(value: f64) -> Self {
        let integral = value.fract() == 0.0
            && value >= i32::MIN as f64
            && value <= i32::MAX as f64
            && !(value == 0.0 && value.is_sign_negative());
        if integral {
            Local::Integer(value as i32)
        } else {
            Local::Double(value)
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Local::String(value.into())
    }

    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Local::Ref(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Local::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Local::Integer(v) => Some(*v as f64),
            Local::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Local::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Local::Undefined | Local::Null)
    }
}

impl From<i32> for Local {
    fn from(v: i32) -> Self {
        Local::Integer(v)
    }
}

impl From<f64> for Local {
    fn from(v: f64) -> Self {
        Local::number(v)
    }
}

impl From<bool> for Local {
    fn from(v: bool) -> Self {
        Local::Boolean(v)
    }
}

impl From<&str> for Local {
    fn from(v: &str) -> Self {
        Local::String(v.to_string())
    }
}

impl From<String> for Local {
    fn from(v: String) -> Self {
        Local::String(v)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Slots
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub(crate) enum FunctionBody {
    Host { callback: CallbackId, returns: ReturnKind },
    Program { body: Program, script: Arc<ScriptInfo> },
}

pub(crate) enum SlotKind {
    Object,
    Array,
    Function(FunctionBody),
    Opaque,
}

pub(crate) struct Slot {
    pub kind: SlotKind,
    pub properties: Vec<(String, Local)>,
    pub elements: Vec<Local>,
    pub prototype: Option<ObjectRef>,
    pub hash: u32,
}

impl Slot {
    fn value_kind(&self) -> ValueKind {
        match self.kind {
            SlotKind::Object => ValueKind::Object,
            SlotKind::Array => ValueKind::Array,
            SlotKind::Function(_) => ValueKind::Function,
            SlotKind::Opaque => ValueKind::Unsupported,
        }
    }

    fn own(&self, key: &str) -> Option<&Local> {
        self.properties.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

fn identity_hash(slot: u64) -> u32 {
    let mut z = slot.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    (z ^ (z >> 31)) as u32
}

/// Largest array index; `2^32 - 1` and above are ordinary property names.
const MAX_ARRAY_INDEX: u64 = u32::MAX as u64 - 1;

/// Writes further than this past the end of an array's elements are stored
/// as named properties instead of growing the dense storage.
const MAX_DENSE_GAP: usize = 1 << 16;

fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    let index: u64 = key.parse().ok()?;
    if index > MAX_ARRAY_INDEX {
        return None;
    }
    usize::try_from(index).ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Heap
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct Heap {
    slots: HashMap<u64, Slot>,
    next_slot: u64,
    handles: HashMap<NativeId, ObjectRef>,
    next_handle: u64,
    pub global: ObjectRef,
}

impl Heap {
    pub fn new() -> Self {
        let mut heap = Self {
            slots: HashMap::new(),
            next_slot: 1,
            handles: HashMap::new(),
            next_handle: 1,
            global: ObjectRef(0),
        };
        heap.global = heap.alloc(SlotKind::Object);
        heap
    }

    pub fn alloc(&mut self, kind: SlotKind) -> ObjectRef {
        let id = self.next_slot;
        self.next_slot += 1;
        self.slots.insert(
            id,
            Slot {
                kind,
                properties: Vec::new(),
                elements: Vec::new(),
                prototype: None,
                hash: identity_hash(id),
            },
        );
        ObjectRef(id)
    }

    pub fn slot(&self, r: ObjectRef) -> Option<&Slot> {
        self.slots.get(&r.0)
    }

    pub fn slot_mut(&mut self, r: ObjectRef) -> Option<&mut Slot> {
        self.slots.get_mut(&r.0)
    }

    pub fn kind(&self, r: ObjectRef) -> ValueKind {
        self.slot(r).map(Slot::value_kind).unwrap_or(ValueKind::Undefined)
    }

    pub fn hash(&self, r: ObjectRef) -> u32 {
        self.slot(r).map(|s| s.hash).unwrap_or(0)
    }

    pub fn function_body(&self, r: ObjectRef) -> Option<FunctionBody> {
        match &self.slot(r)?.kind {
            SlotKind::Function(body) => Some(body.clone()),
            _ => None,
        }
    }

    // ── handles ──────────────────────────────────────────────────────────────

    pub fn new_handle(&mut self, r: ObjectRef) -> NativeId {
        let id = NativeId(self.next_handle);
        self.next_handle += 1;
        self.handles.insert(id, r);
        id
    }

    pub fn resolve(&self, id: NativeId) -> Result<ObjectRef, EngineError> {
        self.handles.get(&id).copied().ok_or(EngineError::UnknownHandle(id))
    }

    pub fn drop_handle(&mut self, id: NativeId) -> Result<ObjectRef, EngineError> {
        self.handles.remove(&id).ok_or(EngineError::UnknownHandle(id))
    }

    pub fn live_handles(&self) -> usize {
        self.handles.len()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Hand a value to the host. References become fresh native handles.
    pub fn export(&mut self, value: &Local) -> EngineValue {
        match value {
            Local::Undefined => EngineValue::Undefined,
            Local::Null => EngineValue::Null,
            Local::Boolean(b) => EngineValue::Boolean(*b),
            Local::Integer(i) => EngineValue::Integer(*i),
            Local::Double(d) => EngineValue::Double(*d),
            Local::String(s) => EngineValue::String(s.clone()),
            Local::Ref(r) => {
                if self.slot(*r).is_none() {
                    return EngineValue::Undefined;
                }
                let kind = self.kind(*r);
                EngineValue::Ref {
                    id: self.new_handle(*r),
                    kind,
                }
            }
        }
    }

    /// Read a host value without taking ownership of its reference.
    pub fn import_borrowed(&self, value: &EngineValue) -> Result<Local, EngineError> {
        Ok(match value {
            EngineValue::Undefined => Local::Undefined,
            EngineValue::Null => Local::Null,
            EngineValue::Boolean(b) => Local::Boolean(*b),
            EngineValue::Integer(i) => Local::Integer(*i),
            EngineValue::Double(d) => Local::Double(*d),
            EngineValue::String(s) => Local::String(s.clone()),
            EngineValue::Ref { id, .. } => Local::Ref(self.resolve(*id)?),
        })
    }

    /// Read a host value and release the reference it carries.
    pub fn import_owned(&mut self, value: EngineValue) -> Result<Local, EngineError> {
        match value {
            EngineValue::Ref { id, .. } => Ok(Local::Ref(self.drop_handle(id)?)),
            other => self.import_borrowed(&other),
        }
    }

    // ── properties ───────────────────────────────────────────────────────────

    /// Property lookup along the prototype chain.
    pub fn get(&self, r: ObjectRef, key: &str) -> Local {
        let Some(slot) = self.slot(r) else {
            return Local::Undefined;
        };
        if matches!(slot.kind, SlotKind::Array) {
            if key == "length" {
                return Local::Integer(slot.elements.len() as i32);
            }
            if let Some(value) = array_index(key).and_then(|index| slot.elements.get(index)) {
                return value.clone();
            }
        }
        let mut current = Some(r);
        let mut depth = 0;
        while let Some(at) = current {
            let Some(slot) = self.slot(at) else { break };
            if let Some(v) = slot.own(key) {
                return v.clone();
            }
            current = slot.prototype;
            depth += 1;
            if depth > 1024 {
                break;
            }
        }
        Local::Undefined
    }

    pub fn has(&self, r: ObjectRef, key: &str) -> bool {
        let mut current = Some(r);
        while let Some(at) = current {
            let Some(slot) = self.slot(at) else { return false };
            if slot.own(key).is_some() {
                return true;
            }
            current = slot.prototype;
        }
        false
    }

    pub fn set(&mut self, r: ObjectRef, key: &str, value: Local) {
        let Some(slot) = self.slot_mut(r) else { return };
        if matches!(slot.kind, SlotKind::Array) {
            if let Some(index) = array_index(key) {
                let len = slot.elements.len();
                if index < len {
                    slot.elements[index] = value;
                    return;
                }
                // sparse writes do not extend `length`
                if index - len <= MAX_DENSE_GAP {
                    slot.elements.resize(index + 1, Local::Undefined);
                    slot.elements[index] = value;
                    return;
                }
            }
        }
        match slot.properties.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => slot.properties.push((key.to_string(), value)),
        }
    }

    pub fn keys(&self, r: ObjectRef) -> Vec<String> {
        let Some(slot) = self.slot(r) else {
            return Vec::new();
        };
        let is_function = matches!(slot.kind, SlotKind::Function(_));
        (0..slot.elements.len())
            .map(|i| i.to_string())
            .chain(
                slot.properties
                    .iter()
                    .filter(|(k, _)| !(is_function && k == "prototype"))
                    .map(|(k, _)| k.clone()),
            )
            .collect()
    }

    pub fn element(&self, r: ObjectRef, index: usize) -> Local {
        self.slot(r)
            .and_then(|s| s.elements.get(index).cloned())
            .unwrap_or(Local::Undefined)
    }

    pub fn push(&mut self, r: ObjectRef, value: Local) {
        if let Some(slot) = self.slot_mut(r) {
            slot.elements.push(value);
        }
    }

    pub fn length(&self, r: ObjectRef) -> usize {
        self.slot(r).map(|s| s.elements.len()).unwrap_or(0)
    }

    // ── collection ───────────────────────────────────────────────────────────

    /// Mark from the global object and every live native handle, then sweep.
    /// Returns the number of slots reclaimed.
    pub fn collect(&mut self) -> usize {
        let mut marked: HashSet<u64> = HashSet::new();
        let mut stack: Vec<ObjectRef> = vec![self.global];
        stack.extend(self.handles.values().copied());

        while let Some(r) = stack.pop() {
            if !marked.insert(r.0) {
                continue;
            }
            let Some(slot) = self.slot(r) else { continue };
            stack.extend(slot.prototype);
            for v in slot.properties.iter().map(|(_, v)| v).chain(slot.elements.iter()) {
                if let Local::Ref(child) = v {
                    stack.push(*child);
                }
            }
        }

        let before = self.slots.len();
        self.slots.retain(|id, _| marked.contains(id));
        before - self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_normalisation() {
        assert_eq!(Local::number(3.0), Local::Integer(3));
        assert_eq!(Local::number(3.5), Local::Double(3.5));
        assert_eq!(Local::number(1e12), Local::Double(1e12));
        assert!(matches!(Local::number(-0.0), Local::Double(d) if d == 0.0 && d.is_sign_negative()));
        assert_eq!(Local::number(0.0), Local::Integer(0));
    }

    #[test]
    fn test_prototype_lookup() {
        let mut heap = Heap::new();
        let proto = heap.alloc(SlotKind::Object);
        let obj = heap.alloc(SlotKind::Object);
        heap.set(proto, "greeting", Local::string("hi"));
        heap.slot_mut(obj).unwrap().prototype = Some(proto);

        assert_eq!(heap.get(obj, "greeting"), Local::string("hi"));
        assert!(heap.has(obj, "greeting"));
        assert!(heap.keys(obj).is_empty());
    }

    #[test]
    fn test_array_index_properties() {
        let mut heap = Heap::new();
        let arr = heap.alloc(SlotKind::Array);
        heap.push(arr, Local::Integer(1));
        heap.set(arr, "2", Local::Integer(3));

        assert_eq!(heap.get(arr, "length"), Local::Integer(3));
        assert_eq!(heap.element(arr, 1), Local::Undefined);
        assert_eq!(heap.keys(arr), vec!["0", "1", "2"]);
    }

    #[test]
    fn test_huge_array_keys_stay_named() {
        let mut heap = Heap::new();
        let arr = heap.alloc(SlotKind::Array);
        heap.push(arr, Local::Integer(1));

        // beyond u64, and beyond the last valid index
        heap.set(arr, "18446744073709551615", Local::Integer(2));
        heap.set(arr, "4294967295", Local::Integer(3));
        // valid index, but far past the end
        heap.set(arr, "4000000000", Local::Integer(4));

        assert_eq!(heap.length(arr), 1);
        assert_eq!(heap.get(arr, "18446744073709551615"), Local::Integer(2));
        assert_eq!(heap.get(arr, "4294967295"), Local::Integer(3));
        assert_eq!(heap.get(arr, "4000000000"), Local::Integer(4));
        assert_eq!(heap.element(arr, 0), Local::Integer(1));
        assert_eq!(
            heap.keys(arr),
            vec!["0", "18446744073709551615", "4294967295", "4000000000"]
        );

        heap.set(arr, "4000000000", Local::Integer(5));
        assert_eq!(heap.get(arr, "4000000000"), Local::Integer(5));
    }

    #[test]
    fn test_collect_keeps_reachable() {
        let mut heap = Heap::new();
        let kept = heap.alloc(SlotKind::Object);
        let held = heap.alloc(SlotKind::Object);
        let _garbage = heap.alloc(SlotKind::Object);
        let global = heap.global;
        heap.set(global, "kept", Local::Ref(kept));
        let handle = heap.new_handle(held);

        assert_eq!(heap.collect(), 1);
        assert!(heap.slot(kept).is_some());
        assert_eq!(heap.resolve(handle).unwrap(), held);

        heap.drop_handle(handle).unwrap();
        assert_eq!(heap.collect(), 1);
    }

    #[test]
    fn test_export_creates_fresh_handles() {
        let mut heap = Heap::new();
        let obj = heap.alloc(SlotKind::Object);
        let a = heap.export(&Local::Ref(obj));
        let b = heap.export(&Local::Ref(obj));

        assert_ne!(a.native_id(), b.native_id());
        assert_eq!(heap.live_handles(), 2);
        assert_eq!(heap.import_owned(a).unwrap(), Local::Ref(obj));
        assert_eq!(heap.live_handles(), 1);
    }
}
