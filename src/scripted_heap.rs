//! In-memory host heap
//!
//! [`ScriptedHeap`] is a small object model implementing [`Host`]: objects
//! with ordered own properties (plain or accessor), optional prototype links,
//! callables with instrumentation facts, and per-script metadata. The replay
//! driver and the test suites run the dispatcher against it.
//!
//! The heap is a cheap `Clone` handle over shared state, so a driver can keep
//! mutating objects while the dispatcher owns its own copy of the handle.

use crate::host::{Host, InstrumentedFunction, ScriptInfo};
use crate::identity::{Metadata, MetadataStash};
use crate::value::{PropertyDescriptor, Value};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Reference to an object in a [`ScriptedHeap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub u32);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Plain(Value<Handle>),
    Accessor {
        getter: Option<Handle>,
        setter: Option<Handle>,
    },
}

#[derive(Debug, Clone)]
struct Callable {
    name: String,
    instrumented: Option<InstrumentedFunction>,
}

#[derive(Debug, Clone, Default)]
struct HeapObject {
    properties: Vec<(String, Slot)>,
    proto: Option<Handle>,
    callable: Option<Callable>,
    hidden: Option<Metadata>,
}

impl HeapObject {
    fn slot(&self, key: &str) -> Option<&Slot> {
        self.properties
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, slot)| slot)
    }

    fn put(&mut self, key: &str, slot: Slot) {
        match self.properties.iter_mut().find(|(name, _)| name == key) {
            Some((_, existing)) => *existing = slot,
            None => self.properties.push((key.to_string(), slot)),
        }
    }
}

#[derive(Debug, Default)]
struct HeapState {
    objects: FnvHashMap<Handle, HeapObject>,
    next_handle: u32,
    global: Option<Handle>,
    scripts: BTreeMap<String, ScriptInfo>,
}

impl HeapState {
    /// Next unused handle; wraps past `u32::MAX` and skips occupied ones
    fn fresh_handle(&mut self) -> Handle {
        let mut candidate = self.next_handle;
        while self.objects.contains_key(&Handle(candidate)) {
            candidate = candidate.wrapping_add(1);
        }
        self.next_handle = candidate.wrapping_add(1);
        Handle(candidate)
    }
}

/// Shared in-memory heap
#[derive(Debug, Clone, Default)]
pub struct ScriptedHeap {
    state: Rc<RefCell<HeapState>>,
}

/// Longest prototype chain followed by property lookups
const MAX_PROTO_DEPTH: usize = 64;

impl ScriptedHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an empty plain object
    pub fn alloc_object(&self) -> Handle {
        let mut state = self.state.borrow_mut();
        let handle = state.fresh_handle();
        state.objects.insert(handle, HeapObject::default());
        handle
    }

    /// Allocate a function together with its `prototype` object
    pub fn alloc_function(&self, name: &str, instrumented: Option<InstrumentedFunction>) -> Handle {
        let function = self.alloc_object();
        let prototype = self.alloc_object();
        self.make_callable(function, name, instrumented);
        self.set_plain(function, "prototype", Value::Object(prototype));
        function
    }

    /// Make sure `handle` names an object; later allocations never reuse it
    pub fn ensure_object(&self, handle: Handle) {
        let mut state = self.state.borrow_mut();
        state.objects.entry(handle).or_default();
        if handle.0 >= state.next_handle {
            state.next_handle = handle.0.wrapping_add(1);
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.state.borrow().objects.contains_key(&handle)
    }

    /// Turn `handle` into a callable
    pub fn make_callable(&self, handle: Handle, name: &str, instrumented: Option<InstrumentedFunction>) {
        self.ensure_object(handle);
        self.with_object(handle, |obj| {
            obj.callable = Some(Callable {
                name: name.to_string(),
                instrumented,
            });
        });
    }

    pub fn set_proto(&self, handle: Handle, proto: Option<Handle>) {
        self.with_object(handle, |obj| obj.proto = proto);
    }

    /// Define or overwrite a plain data property
    pub fn set_plain(&self, handle: Handle, key: &str, value: Value<Handle>) {
        self.with_object(handle, |obj| obj.put(key, Slot::Plain(value)));
    }

    pub fn define_accessor(&self, handle: Handle, key: &str, getter: Option<Handle>, setter: Option<Handle>) {
        self.with_object(handle, |obj| obj.put(key, Slot::Accessor { getter, setter }));
    }

    /// Assign through `key` the way a field write does.
    ///
    /// Accessor properties are left alone (the host runs the setter); plain
    /// or missing properties take the new value.
    pub fn assign(&self, handle: Handle, key: &str, value: Value<Handle>) {
        self.with_object(handle, |obj| {
            if !matches!(obj.slot(key), Some(Slot::Accessor { .. })) {
                obj.put(key, Slot::Plain(value));
            }
        });
    }

    /// Remove an own property; returns whether it existed
    pub fn delete(&self, handle: Handle, key: &str) -> bool {
        self.with_object(handle, |obj| {
            let before = obj.properties.len();
            obj.properties.retain(|(name, _)| name != key);
            obj.properties.len() != before
        })
        .unwrap_or(false)
    }

    /// Value of a plain own property
    pub fn get(&self, handle: Handle, key: &str) -> Option<Value<Handle>> {
        let state = self.state.borrow();
        match state.objects.get(&handle)?.slot(key)? {
            Slot::Plain(value) => Some(value.clone()),
            Slot::Accessor { .. } => None,
        }
    }

    pub fn set_global(&self, handle: Handle) {
        self.ensure_object(handle);
        self.state.borrow_mut().global = Some(handle);
    }

    pub fn register_script(&self, file_name: &str, info: ScriptInfo) {
        self.state
            .borrow_mut()
            .scripts
            .insert(file_name.to_string(), info);
    }

    fn with_object<T>(&self, handle: Handle, f: impl FnOnce(&mut HeapObject) -> T) -> Option<T> {
        let mut state = self.state.borrow_mut();
        match state.objects.get_mut(&handle) {
            Some(obj) => Some(f(obj)),
            None => {
                tracing::warn!(%handle, "no such heap object");
                None
            }
        }
    }

    fn describe(state: &HeapState, handle: Handle, key: &str) -> Option<PropertyDescriptor<Handle>> {
        let slot = state.objects.get(&handle)?.slot(key)?;
        Some(match slot {
            Slot::Plain(value) => PropertyDescriptor::Plain {
                value: value.clone(),
            },
            Slot::Accessor { getter, setter } => PropertyDescriptor::Accessor {
                getter: *getter,
                setter: *setter,
            },
        })
    }
}

impl Host for ScriptedHeap {
    type Ref = Handle;

    fn describe_property(&self, obj: &Handle, name: &str) -> Option<PropertyDescriptor<Handle>> {
        Self::describe(&self.state.borrow(), *obj, name)
    }

    fn find_property(&self, obj: &Handle, name: &str) -> Option<PropertyDescriptor<Handle>> {
        let state = self.state.borrow();
        let mut current = Some(*obj);
        for _ in 0..MAX_PROTO_DEPTH {
            let handle = current?;
            if let Some(desc) = Self::describe(&state, handle, name) {
                return Some(desc);
            }
            current = state.objects.get(&handle).and_then(|o| o.proto);
        }
        None
    }

    fn own_keys(&self, obj: &Handle) -> Vec<String> {
        self.state
            .borrow()
            .objects
            .get(obj)
            .map(|o| o.properties.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default()
    }

    fn is_callable(&self, obj: &Handle) -> bool {
        self.state
            .borrow()
            .objects
            .get(obj)
            .is_some_and(|o| o.callable.is_some())
    }

    fn function_name(&self, function: &Handle) -> Option<String> {
        let state = self.state.borrow();
        let callable = state.objects.get(function)?.callable.as_ref()?;
        Some(callable.name.clone())
    }

    fn function_prototype(&self, function: &Handle) -> Option<Handle> {
        match self.describe_property(function, "prototype") {
            Some(PropertyDescriptor::Plain {
                value: Value::Object(proto),
            }) => Some(proto),
            _ => None,
        }
    }

    fn instrumented_function(&self, function: &Handle) -> Option<InstrumentedFunction> {
        let state = self.state.borrow();
        state.objects.get(function)?.callable.as_ref()?.instrumented
    }

    fn is_global_object(&self, obj: &Handle) -> bool {
        self.state.borrow().global == Some(*obj)
    }

    fn script_info(&self, file_name: &str) -> ScriptInfo {
        self.state
            .borrow()
            .scripts
            .get(file_name)
            .cloned()
            .unwrap_or_default()
    }

    fn hidden_id_stash(&self) -> Option<Box<dyn MetadataStash<Handle>>> {
        Some(Box::new(HiddenSlots {
            state: Rc::clone(&self.state),
        }))
    }
}

/// Metadata kept in a hidden slot on each heap object
struct HiddenSlots {
    state: Rc<RefCell<HeapState>>,
}

impl MetadataStash<Handle> for HiddenSlots {
    fn get(&self, obj: &Handle) -> Option<Metadata> {
        self.state.borrow().objects.get(obj).and_then(|o| o.hidden)
    }

    fn set(&mut self, obj: &Handle, meta: Metadata) {
        let mut state = self.state.borrow_mut();
        state.objects.entry(*obj).or_default().hidden = Some(meta);
    }

    fn len(&self) -> usize {
        self.state
            .borrow()
            .objects
            .values()
            .filter(|o| o.hidden.is_some())
            .count()
    }
}
