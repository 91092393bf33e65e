//! Host collaborator boundary
//!
//! The tracer runs inside some other runtime (the *host*). Everything it needs
//! to know about that runtime's objects and instrumentation comes through the
//! traits in this module:
//!
//! - [`Host`]: object-model capability queries (property descriptors, own
//!   keys, callability, prototypes) plus the instrumentation framework's
//!   per-function and per-script metadata
//! - [`NativeModels`]: the collaborator that models platform objects natively
//!   and may claim events before the dispatcher handles them

use crate::identity::MetadataStash;
use crate::value::{FreeVars, Iid, PropertyDescriptor, ScriptId, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;

/// Instrumentation facts about a function the framework rewrote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentedFunction {
    /// Site of the function's entry hook
    pub enter_site: Iid,
    /// Stable per-function identifier
    pub stable_id: u32,
}

/// Instrumentation metadata for one script
///
/// Keys of `source_map` and `free_vars` are site ids as the instrumentation
/// framework spells them; keys that do not parse as a site are skipped when
/// the metadata is logged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScriptInfo {
    pub script_id: ScriptId,
    pub original_file_name: String,
    /// site → `[start line, start column, end line, end column]`
    pub source_map: BTreeMap<String, [u32; 4]>,
    /// function entry site → free variables of that function
    pub free_vars: BTreeMap<String, FreeVars>,
}

/// Object-model and instrumentation queries answered by the host
pub trait Host {
    /// Opaque reference to a host heap object, compared by identity
    type Ref: Clone + Eq + Hash + fmt::Debug + 'static;

    /// Describe the own property `name` of `obj`, if it exists
    fn describe_property(&self, obj: &Self::Ref, name: &str) -> Option<PropertyDescriptor<Self::Ref>>;

    /// Describe `name` as seen through `obj`, walking the prototype chain
    fn find_property(&self, obj: &Self::Ref, name: &str) -> Option<PropertyDescriptor<Self::Ref>> {
        self.describe_property(obj, name)
    }

    /// Own enumerable property names of `obj`, in definition order
    fn own_keys(&self, obj: &Self::Ref) -> Vec<String>;

    fn is_callable(&self, obj: &Self::Ref) -> bool;

    fn function_name(&self, function: &Self::Ref) -> Option<String>;

    /// The object stored in the function's `prototype` property, if any
    fn function_prototype(&self, function: &Self::Ref) -> Option<Self::Ref>;

    /// Entry site and stable id of an instrumented function
    fn instrumented_function(&self, function: &Self::Ref) -> Option<InstrumentedFunction>;

    fn is_global_object(&self, obj: &Self::Ref) -> bool;

    /// Instrumentation metadata for the script being entered
    fn script_info(&self, file_name: &str) -> ScriptInfo;

    /// Metadata stash backed by hidden slots on host objects.
    ///
    /// Hosts that cannot attach hidden data to their objects return `None`.
    fn hidden_id_stash(&self) -> Option<Box<dyn MetadataStash<Self::Ref>>> {
        None
    }
}

/// A function invocation as reported by the call hooks
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a, R> {
    pub site: Iid,
    pub callee: &'a Value<R>,
    pub receiver: &'a Value<R>,
    pub args: &'a [Value<R>],
    pub is_constructor: bool,
    pub is_method: bool,
}

/// Result a native model may substitute for a field write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeOverride {
    /// The host should not perform the write itself
    pub skip: bool,
}

/// Native object modelling collaborator
///
/// All methods default to "not handled", which is what a host without
/// platform objects wants.
pub trait NativeModels<R> {
    /// Return `true` to claim the invocation; the dispatcher then ignores it
    fn model_invoke_fun_pre(&mut self, _call: &Invocation<'_, R>) -> bool {
        false
    }

    fn model_invoke_fun(&mut self, _call: &Invocation<'_, R>, _result: &Value<R>) {}

    fn model_put_field_pre(
        &mut self,
        _site: Iid,
        _base: &R,
        _offset: &str,
        _value: &Value<R>,
    ) -> Option<NativeOverride> {
        None
    }

    fn model_put_field(&mut self, _site: Iid, _base: &R, _offset: &str, _value: &Value<R>) {}
}

/// Native models for hosts without platform objects
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNativeModels;

impl<R> NativeModels<R> for NoNativeModels {}
