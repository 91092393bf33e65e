//! Event script replay
//!
//! An event script is a JSON description of a heap and an ordered list of
//! hook events. Replaying it builds a [`ScriptedHeap`], drives every event
//! through a [`HookDispatcher`] and hands back the sink.
//!
//! ```json
//! {
//!   "global": 0,
//!   "objects": [
//!     { "handle": 1, "callable": { "name": "F", "enterSite": 100, "stableId": 7, "prototype": 2 } },
//!     { "handle": 3, "properties": [ { "name": "x", "value": 1 }, { "name": "y", "get": 4 } ] }
//!   ],
//!   "scripts": { "app.js": { "scriptId": 1, "sourceMap": { "12": [1, 0, 1, 9] } } },
//!   "events": [
//!     { "hook": "scriptEnter", "site": 1, "fileName": "app.js" },
//!     { "hook": "declare", "site": 12, "name": "o", "value": { "obj": 3 } },
//!     { "hook": "putField", "site": 13, "base": { "obj": 3 }, "offset": "x", "value": 2 },
//!     { "hook": "endExecution" }
//!   ]
//! }
//! ```
//!
//! Values are `{"obj": handle}`, numbers, strings or booleans; `null` or an
//! absent value is `undefined`.

use crate::dispatcher::{HookDispatcher, TraceState, DELETE_OPERATOR};
use crate::error::{Result, TraceError};
use crate::host::{InstrumentedFunction, Invocation, ScriptInfo};
use crate::logger::EventLogger;
use crate::options::TraceOptions;
use crate::scripted_heap::{Handle, ScriptedHeap};
use crate::value::{FreeVars, Iid, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

/// A value as written in an event script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptValue {
    Object { obj: Handle },
    Bool(bool),
    Number(f64),
    Str(String),
}

fn to_value(heap: &ScriptedHeap, value: &Option<ScriptValue>) -> Value<Handle> {
    match value {
        None => Value::Undefined,
        Some(ScriptValue::Object { obj }) => {
            heap.ensure_object(*obj);
            Value::Object(*obj)
        }
        Some(ScriptValue::Bool(b)) => Value::Bool(*b),
        Some(ScriptValue::Number(n)) => Value::Number(*n),
        Some(ScriptValue::Str(s)) => Value::Str(s.clone()),
    }
}

fn to_values(heap: &ScriptedHeap, values: &[Option<ScriptValue>]) -> Vec<Value<Handle>> {
    values.iter().map(|v| to_value(heap, v)).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CallableSpec {
    pub name: String,
    /// Entry site; absent for uninstrumented (native) functions
    #[serde(default)]
    pub enter_site: Option<Iid>,
    #[serde(default)]
    pub stable_id: u32,
    /// Handle of the function's `prototype` object
    #[serde(default)]
    pub prototype: Option<Handle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PropertySpec {
    pub name: String,
    #[serde(default)]
    pub value: Option<ScriptValue>,
    #[serde(default)]
    pub get: Option<Handle>,
    #[serde(default)]
    pub set: Option<Handle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ObjectSpec {
    pub handle: Handle,
    #[serde(default)]
    pub callable: Option<CallableSpec>,
    #[serde(default)]
    pub proto: Option<Handle>,
    #[serde(default)]
    pub properties: Vec<PropertySpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EvalFunction {
    pub enter_site: Iid,
    pub free_vars: FreeVars,
}

/// One hook event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "hook", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Event {
    Declare {
        site: Iid,
        name: String,
        #[serde(default)]
        value: Option<ScriptValue>,
        #[serde(default)]
        is_argument: bool,
    },
    Literal {
        site: Iid,
        value: Option<ScriptValue>,
        #[serde(default)]
        has_accessors: bool,
    },
    InvokeFunPre {
        site: Iid,
        callee: Option<ScriptValue>,
        #[serde(default)]
        receiver: Option<ScriptValue>,
        #[serde(default)]
        args: Vec<Option<ScriptValue>>,
        #[serde(default)]
        is_constructor: bool,
        #[serde(default)]
        is_method: bool,
    },
    InvokeFun {
        site: Iid,
        callee: Option<ScriptValue>,
        #[serde(default)]
        receiver: Option<ScriptValue>,
        #[serde(default)]
        args: Vec<Option<ScriptValue>>,
        #[serde(default)]
        is_constructor: bool,
        #[serde(default)]
        is_method: bool,
        #[serde(default)]
        result: Option<ScriptValue>,
    },
    /// Pre-write hook, the write itself, then the post-write hook
    PutField {
        site: Iid,
        base: Option<ScriptValue>,
        offset: String,
        #[serde(default)]
        value: Option<ScriptValue>,
    },
    Write {
        site: Iid,
        name: String,
        #[serde(default)]
        value: Option<ScriptValue>,
        #[serde(default)]
        old_value: Option<ScriptValue>,
    },
    FunctionEnter {
        site: Iid,
        function: Option<ScriptValue>,
        #[serde(default)]
        receiver: Option<ScriptValue>,
        #[serde(default)]
        args: Vec<Option<ScriptValue>>,
    },
    FunctionExit {
        site: Iid,
        #[serde(default)]
        return_value: Option<ScriptValue>,
        #[serde(default)]
        exception: Option<ScriptValue>,
    },
    GetField {
        site: Iid,
        base: Option<ScriptValue>,
        offset: String,
        #[serde(default)]
        value: Option<ScriptValue>,
    },
    /// `delete` removes the property from the heap before the hook runs
    Binary {
        site: Iid,
        op: String,
        #[serde(default)]
        left: Option<ScriptValue>,
        #[serde(default)]
        right: Option<ScriptValue>,
        #[serde(default)]
        result: Option<ScriptValue>,
    },
    ScriptEnter {
        site: Iid,
        file_name: String,
    },
    ScriptExit {
        site: Iid,
    },
    InstrumentCode {
        site: Iid,
        functions: Vec<EvalFunction>,
    },
    EndExpression {
        site: Iid,
    },
    EndExecution,
    /// Heap mutation by uninstrumented code; no hook fires
    SetProperty {
        base: Handle,
        offset: String,
        #[serde(default)]
        value: Option<ScriptValue>,
    },
}

/// A complete event script
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct EventScript {
    pub global: Option<Handle>,
    pub objects: Vec<ObjectSpec>,
    pub scripts: BTreeMap<String, ScriptInfo>,
    pub events: Vec<Event>,
}

impl EventScript {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TraceError::InvalidScript(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| TraceError::InvalidScript(format!("{}: {}", path.display(), e)))
    }

    /// Build the heap the events run against
    pub fn build_heap(&self) -> Result<ScriptedHeap> {
        let heap = ScriptedHeap::new();
        let mut declared = BTreeSet::new();
        for spec in &self.objects {
            if !declared.insert(spec.handle) {
                return Err(TraceError::InvalidScript(format!(
                    "object {} declared twice",
                    spec.handle
                )));
            }
            heap.ensure_object(spec.handle);
        }
        for spec in &self.objects {
            if let Some(callable) = &spec.callable {
                let instrumented = callable.enter_site.map(|enter_site| InstrumentedFunction {
                    enter_site,
                    stable_id: callable.stable_id,
                });
                heap.make_callable(spec.handle, &callable.name, instrumented);
                if let Some(prototype) = callable.prototype {
                    heap.ensure_object(prototype);
                    heap.set_plain(spec.handle, "prototype", Value::Object(prototype));
                }
            }
            if let Some(proto) = spec.proto {
                heap.ensure_object(proto);
                heap.set_proto(spec.handle, Some(proto));
            }
            for property in &spec.properties {
                if property.get.is_some() || property.set.is_some() {
                    for accessor in property.get.iter().chain(property.set.iter()) {
                        heap.ensure_object(*accessor);
                    }
                    heap.define_accessor(spec.handle, &property.name, property.get, property.set);
                } else {
                    let value = to_value(&heap, &property.value);
                    heap.set_plain(spec.handle, &property.name, value);
                }
            }
        }
        if let Some(global) = self.global {
            heap.set_global(global);
        }
        for (file_name, info) in &self.scripts {
            heap.register_script(file_name, info.clone());
        }
        Ok(heap)
    }
}

/// What a replay did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: usize,
    pub records: u64,
    pub objects_tracked: usize,
    pub done_logging: bool,
}

impl fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "replayed {} events: {} records, {} objects tracked",
            self.events, self.records, self.objects_tracked
        )
    }
}

/// Result of [`replay`]: the sink, the summary and the error that aborted
/// the trace, if any
pub struct ReplayOutcome<L> {
    pub logger: L,
    pub summary: ReplaySummary,
    pub error: Option<TraceError>,
}

/// Run every event of `script` through a dispatcher writing to `logger`.
///
/// A fatal hook error aborts the trace but not the replay: remaining events
/// still mutate the heap and their hooks are no-ops. Scripts without an
/// `endExecution` event get one appended.
pub fn replay<L: EventLogger>(script: &EventScript, logger: L, options: &TraceOptions) -> Result<ReplayOutcome<L>> {
    let heap = script.build_heap()?;
    let mut dispatcher = HookDispatcher::new(heap.clone(), logger, options)?;
    let mut error = None;
    for (index, event) in script.events.iter().enumerate() {
        if let Err(err) = apply(&heap, &mut dispatcher, event) {
            tracing::warn!(index, %err, "event aborted the trace");
            error.get_or_insert(err);
        }
    }
    if dispatcher.state() == TraceState::Tracing {
        if let Err(err) = dispatcher.end_execution() {
            error.get_or_insert(err);
        }
    }
    let summary = ReplaySummary {
        events: script.events.len(),
        records: dispatcher.logger().logical_time(),
        objects_tracked: dispatcher.identity().tracked_count(),
        done_logging: dispatcher.is_done_logging(),
    };
    let (_, logger) = dispatcher.into_parts();
    Ok(ReplayOutcome {
        logger,
        summary,
        error,
    })
}

fn apply<L: EventLogger>(
    heap: &ScriptedHeap,
    dispatcher: &mut HookDispatcher<ScriptedHeap, L>,
    event: &Event,
) -> Result<()> {
    let v = |value: &Option<ScriptValue>| to_value(heap, value);
    match event {
        Event::Declare {
            site,
            name,
            value,
            is_argument,
        } => dispatcher.declare(*site, name, &v(value), *is_argument),
        Event::Literal {
            site,
            value,
            has_accessors,
        } => dispatcher.literal(*site, &v(value), *has_accessors),
        Event::InvokeFunPre {
            site,
            callee,
            receiver,
            args,
            is_constructor,
            is_method,
        } => {
            let (callee, receiver, args) = (v(callee), v(receiver), to_values(heap, args));
            dispatcher.invoke_fun_pre(&Invocation {
                site: *site,
                callee: &callee,
                receiver: &receiver,
                args: &args,
                is_constructor: *is_constructor,
                is_method: *is_method,
            })
        }
        Event::InvokeFun {
            site,
            callee,
            receiver,
            args,
            is_constructor,
            is_method,
            result,
        } => {
            let (callee, receiver, args) = (v(callee), v(receiver), to_values(heap, args));
            let call = Invocation {
                site: *site,
                callee: &callee,
                receiver: &receiver,
                args: &args,
                is_constructor: *is_constructor,
                is_method: *is_method,
            };
            dispatcher.invoke_fun(&call, &v(result))
        }
        Event::PutField {
            site,
            base,
            offset,
            value,
        } => {
            let (base, value) = (v(base), v(value));
            let native = dispatcher.put_field_pre(*site, &base, offset, &value)?;
            let skip_write = native.is_some_and(|o| o.skip);
            if let (Some(handle), false) = (base.as_object(), skip_write) {
                heap.assign(*handle, offset, value.clone());
            }
            dispatcher.put_field(*site, &base, offset, &value)
        }
        Event::Write {
            site,
            name,
            value,
            old_value,
        } => dispatcher.write(*site, name, &v(value), &v(old_value)),
        Event::FunctionEnter {
            site,
            function,
            receiver,
            args,
        } => dispatcher.function_enter(*site, &v(function), &v(receiver), &to_values(heap, args)),
        Event::FunctionExit {
            site,
            return_value,
            exception,
        } => {
            let exception = exception.as_ref().map(|_| v(exception));
            dispatcher.function_exit(*site, &v(return_value), exception.as_ref())
        }
        Event::GetField {
            site,
            base,
            offset,
            value,
        } => dispatcher.get_field(*site, &v(base), offset, &v(value)),
        Event::Binary {
            site,
            op,
            left,
            right,
            result,
        } => {
            let (left, right) = (v(left), v(right));
            if op == DELETE_OPERATOR {
                if let (Some(handle), Some(key)) = (left.as_object(), right.property_key()) {
                    heap.delete(*handle, &key);
                }
            }
            dispatcher.binary(*site, op, &left, &right, &v(result))
        }
        Event::ScriptEnter { site, file_name } => dispatcher.script_enter(*site, file_name),
        Event::ScriptExit { site } => dispatcher.script_exit(*site),
        Event::InstrumentCode { site, functions } => {
            let functions: Vec<_> = functions
                .iter()
                .map(|f| (f.enter_site, f.free_vars.clone()))
                .collect();
            dispatcher.instrument_code(*site, &functions)
        }
        Event::EndExpression { site } => dispatcher.end_expression(*site),
        Event::EndExecution => dispatcher.end_execution(),
        Event::SetProperty {
            base,
            offset,
            value,
        } => {
            heap.ensure_object(*base);
            heap.assign(*base, offset, v(value));
            Ok(())
        }
    }
}
