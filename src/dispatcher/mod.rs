//! Hook dispatcher
//!
//! One [`HookDispatcher`] per traced run. The host calls one hook per runtime
//! event; the dispatcher resolves object ids, refreshes last-use times and
//! decides which records, if any, the event produces.
//!
//! # Event flow
//!
//! ```text
//! host event ──► HookDispatcher ──► ObjectIdentityManager (resolve / allocate)
//!                      │        ──► LastUseTracker        (touch)
//!                      └──────────► EventLogger           (append records)
//! ```
//!
//! # Per-run state
//!
//! - call frames: one entry per `function_enter`, holding the frame's
//!   unannotated-this metadata (or `None`)
//! - skip decisions: one entry per `put_field_pre`, consumed by `put_field`
//! - `pending_call_logged` / `pending_constructor`: set by `invoke_fun_pre`,
//!   consumed by the matching `function_enter`
//!
//! The two stacks are pushed and popped at different event pairs and
//! interleave when a setter runs inside a call, so they stay separate.
//!
//! # Failure
//!
//! A fatal condition returns an error from the failing hook, stops the sink
//! and turns every later hook into a no-op. The traced program is unaffected.

use crate::error::{Result, TraceError};
use crate::host::{Host, Invocation, NativeModels, NativeOverride, NoNativeModels};
use crate::identity::{Metadata, ObjectIdentityManager, Resolved};
use crate::last_use::LastUseTracker;
use crate::logger::{EventLogger, FlushPoint};
use crate::options::TraceOptions;
use crate::value::{FreeVars, Iid, ObjectId, PropertyDescriptor, Value};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;


/// Binding name of the argument bundle; declarations of it are not logged
pub const ARGUMENTS_BINDING: &str = "arguments";

/// Binding name used for receiver declarations
pub const THIS_BINDING: &str = "this";

/// Synthetic field linking a constructed object to its prototype
pub const PROTO_FIELD: &str = "__proto__";

/// The only binary operator with a logging effect
pub const DELETE_OPERATOR: &str = "delete";

/// How `invoke_fun_pre` behaves, fixed at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeStrategy {
    Plain,
    /// Log a DEBUG record for the first argument of every call to
    /// `function_name`; the argument must already be tracked
    DebugCheck { function_name: String },
}

impl InvokeStrategy {
    pub fn from_options(options: &TraceOptions) -> Self {
        match &options.debug_function_name {
            Some(name) if !name.is_empty() => InvokeStrategy::DebugCheck {
                function_name: name.clone(),
            },
            _ => InvokeStrategy::Plain,
        }
    }
}

/// Lifecycle of a tracing session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceState {
    Tracing,
    /// `stop_tracing` was requested
    Stopped,
    /// A fatal error ended the session
    Aborted,
    /// `end_execution` ran
    Finished,
}

/// Runtime event dispatcher
pub struct HookDispatcher<H: Host, L: EventLogger, N: NativeModels<H::Ref> = NoNativeModels> {
    host: H,
    logger: L,
    natives: N,
    ids: ObjectIdentityManager<H::Ref>,
    last_use: LastUseTracker,
    call_frames: Vec<Option<Metadata>>,
    skip_logging: Vec<bool>,
    pending_call_logged: bool,
    pending_constructor: bool,
    log_all_putfields: bool,
    strategy: InvokeStrategy,
    state: TraceState,
    done_logging: Rc<Cell<bool>>,
}

impl<H: Host, L: EventLogger> HookDispatcher<H, L, NoNativeModels> {
    /// Create a dispatcher for a host without native models
    pub fn new(host: H, logger: L, options: &TraceOptions) -> Result<Self> {
        Self::with_natives(host, logger, NoNativeModels, options)
    }
}

impl<H, L, N> HookDispatcher<H, L, N>
where
    H: Host,
    L: EventLogger,
    N: NativeModels<H::Ref>,
{
    /// Create a dispatcher; this is the `init(options)` step
    pub fn with_natives(host: H, logger: L, natives: N, options: &TraceOptions) -> Result<Self> {
        let ids = if options.use_hidden_property_for_ids {
            let stash = host.hidden_id_stash().ok_or_else(|| {
                TraceError::UnsupportedConfig(
                    "useHiddenPropertyForIds requested but the host has no hidden slots".to_string(),
                )
            })?;
            ObjectIdentityManager::with_stash(stash)
        } else {
            ObjectIdentityManager::new()
        };
        let strategy = InvokeStrategy::from_options(options);
        tracing::debug!(
            ?strategy,
            track_all_uses = options.track_all_uses,
            log_all_putfields = options.log_all_putfields,
            "heap tracer initialized"
        );
        Ok(Self {
            host,
            logger,
            natives,
            ids,
            last_use: LastUseTracker::new(options.track_all_uses),
            call_frames: Vec::new(),
            skip_logging: Vec::new(),
            pending_call_logged: false,
            pending_constructor: false,
            log_all_putfields: options.log_all_putfields,
            strategy,
            state: TraceState::Tracing,
            done_logging: Rc::new(Cell::new(false)),
        })
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn logger(&self) -> &L {
        &self.logger
    }

    pub fn identity(&self) -> &ObjectIdentityManager<H::Ref> {
        &self.ids
    }

    pub fn last_use(&self) -> &LastUseTracker {
        &self.last_use
    }

    pub fn state(&self) -> TraceState {
        self.state
    }

    pub fn strategy(&self) -> &InvokeStrategy {
        &self.strategy
    }

    /// Current call nesting as seen through enter/exit hooks
    pub fn call_depth(&self) -> usize {
        self.call_frames.len()
    }

    /// Field writes whose `put_field` has not arrived yet
    pub fn pending_field_writes(&self) -> usize {
        self.skip_logging.len()
    }

    /// Set once the sink confirms the final flush
    pub fn is_done_logging(&self) -> bool {
        self.done_logging.get()
    }

    pub fn into_parts(self) -> (H, L) {
        (self.host, self.logger)
    }

    fn is_active(&self) -> bool {
        self.state == TraceState::Tracing
    }

    /// Abort the session if `outcome` is an error
    fn settle<T>(&mut self, outcome: Result<T>) -> Result<T> {
        if let Err(err) = &outcome {
            tracing::error!(%err, "aborting heap trace");
            self.state = TraceState::Aborted;
            self.logger.stop_tracing();
        }
        outcome
    }

    fn touch(&mut self, id: ObjectId, site: Iid) {
        let time = self.logger.logical_time();
        self.last_use.update_last_use(id, site, time);
    }

    /// Resolve `obj` to its id, announcing the allocation when it is new.
    ///
    /// A new callable's prototype object is allocated in the same step and
    /// covered by the function's creation record.
    fn resolve(&mut self, obj: &H::Ref, site: Iid, is_literal: bool) -> Result<ObjectId> {
        let source = self.last_use.get_source_id(site);
        match self.ids.find_or_create_unique_id(obj, source, is_literal) {
            Resolved::Existing(id) => Ok(id),
            Resolved::Created { id, origin } => {
                let mut new_prototype = None;
                if self.host.is_callable(obj) {
                    let prototype_id = match self.host.function_prototype(obj) {
                        Some(proto) => {
                            let resolved = self.ids.find_or_create_unique_id(&proto, origin, is_literal);
                            if resolved.is_created() {
                                new_prototype = Some(resolved.id());
                            }
                            resolved.id()
                        }
                        None => ObjectId::PRIMITIVE,
                    };
                    let enter_site = self
                        .host
                        .instrumented_function(obj)
                        .map_or(0, |info| info.enter_site);
                    self.logger.log_create_fun(origin, id, prototype_id, enter_site)?;
                } else {
                    self.logger.log_create_obj(origin, id)?;
                }
                self.touch(id, site);
                if let Some(prototype_id) = new_prototype {
                    self.touch(prototype_id, site);
                }
                Ok(id)
            }
        }
    }

    fn is_accessor(&self, obj: &H::Ref, offset: &str) -> bool {
        self.host
            .find_property(obj, offset)
            .is_some_and(|desc| desc.is_accessor())
    }

    // ------------------------------------------------------------------
    // hooks
    // ------------------------------------------------------------------

    /// Variable or parameter declaration
    pub fn declare(&mut self, site: Iid, name: &str, value: &Value<H::Ref>, _is_argument: bool) -> Result<()> {
        if !self.is_active() || name == ARGUMENTS_BINDING {
            return Ok(());
        }
        let outcome = self.on_declare(site, name, value);
        self.settle(outcome)
    }

    fn on_declare(&mut self, site: Iid, name: &str, value: &Value<H::Ref>) -> Result<()> {
        let id = match value.as_object() {
            Some(obj) => self.resolve(obj, site, false)?,
            None => ObjectId::PRIMITIVE,
        };
        self.logger.log_declare(site, name, id)
    }

    /// Object, array or function literal evaluated
    pub fn literal(&mut self, site: Iid, value: &Value<H::Ref>, has_accessors: bool) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        let outcome = self.on_literal(site, value, has_accessors);
        self.settle(outcome)
    }

    fn on_literal(&mut self, site: Iid, value: &Value<H::Ref>, has_accessors: bool) -> Result<()> {
        let Some(obj) = value.as_object() else {
            return Ok(());
        };
        let literal_id = self.resolve(obj, site, true)?;
        if self.host.is_callable(obj) {
            return Ok(());
        }
        for key in self.host.own_keys(obj) {
            match self.host.describe_property(obj, &key) {
                Some(PropertyDescriptor::Accessor { getter, setter }) if has_accessors => {
                    if let Some(getter) = getter {
                        let id = self.resolve(&getter, site, true)?;
                        self.logger.log_putfield(site, literal_id, &format!("get-{}", key), id)?;
                    }
                    if let Some(setter) = setter {
                        let id = self.resolve(&setter, site, true)?;
                        self.logger.log_putfield(site, literal_id, &format!("set-{}", key), id)?;
                    }
                }
                Some(PropertyDescriptor::Plain {
                    value: Value::Object(child),
                }) => {
                    let child_id = self.resolve(&child, site, false)?;
                    self.logger.log_putfield(site, literal_id, &key, child_id)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Before a call; emits the CALL record for instrumented callees
    pub fn invoke_fun_pre(&mut self, call: &Invocation<'_, H::Ref>) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        let outcome = self.on_invoke_fun_pre(call);
        self.settle(outcome)
    }

    fn on_invoke_fun_pre(&mut self, call: &Invocation<'_, H::Ref>) -> Result<()> {
        if let InvokeStrategy::DebugCheck { function_name } = &self.strategy {
            if let Some(function) = call.callee.as_object() {
                if self.host.function_name(function).as_deref() == Some(function_name.as_str()) {
                    let id = call
                        .args
                        .first()
                        .and_then(Value::as_object)
                        .and_then(|arg| self.ids.find_obj_id(arg))
                        .ok_or_else(|| TraceError::MissingDebugMetadata {
                            function: function_name.clone(),
                            site: call.site,
                        })?;
                    self.logger.log_debug(call.site, id)?;
                }
            }
        }
        self.plain_invoke_fun_pre(call)
    }

    fn plain_invoke_fun_pre(&mut self, call: &Invocation<'_, H::Ref>) -> Result<()> {
        if self.natives.model_invoke_fun_pre(call) {
            return Ok(());
        }
        let Some(function) = call.callee.as_object() else {
            return Ok(());
        };
        if let Some(info) = self.host.instrumented_function(function) {
            let callee_id = self.ids.find_obj_id(function);
            self.logger
                .log_call(call.site, callee_id, info.enter_site, info.stable_id)?;
            self.pending_call_logged = true;
            self.pending_constructor = call.is_constructor;
        }
        Ok(())
    }

    /// After a call returned `result`
    pub fn invoke_fun(&mut self, call: &Invocation<'_, H::Ref>, result: &Value<H::Ref>) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        let outcome = self.on_invoke_fun(call, result);
        self.settle(outcome)
    }

    fn on_invoke_fun(&mut self, call: &Invocation<'_, H::Ref>, result: &Value<H::Ref>) -> Result<()> {
        if let Some(obj) = result.as_object() {
            match self.ids.get_metadata(obj) {
                Some(Metadata::UnannotatedThis(id)) => {
                    if call.is_constructor {
                        self.logger.log_update_iid(id, call.site)?;
                        let proto = call
                            .callee
                            .as_object()
                            .and_then(|function| self.host.function_prototype(function));
                        if let Some(proto) = proto {
                            let proto_id = self.resolve(&proto, call.site, false)?;
                            self.logger.log_putfield(call.site, id, PROTO_FIELD, proto_id)?;
                        }
                    }
                    self.ids.set_metadata(obj, Metadata::Annotated(id));
                }
                Some(Metadata::Annotated(_)) => {}
                None => {
                    // not ours yet; remember where it came from
                    let source = self.last_use.get_source_id(call.site);
                    self.ids.set_source_id_for_native_obj(obj, source);
                }
            }
        }
        self.natives.model_invoke_fun(call, result);
        if let Some(function) = call.callee.as_object() {
            if let Some(fun_id) = self.ids.find_obj_id(function) {
                self.touch(fun_id, call.site);
            }
        }
        Ok(())
    }

    /// Before a field write; decides whether the write can go unlogged
    ///
    /// Returns the native models' override, if they produced one.
    pub fn put_field_pre(
        &mut self,
        site: Iid,
        base: &Value<H::Ref>,
        offset: &str,
        value: &Value<H::Ref>,
    ) -> Result<Option<NativeOverride>> {
        if !self.is_active() {
            return Ok(None);
        }
        let mut skip = false;
        let mut native = None;
        if let (Some(obj), false) = (base.as_object(), self.log_all_putfields) {
            if value.is_object() {
                native = self.natives.model_put_field_pre(site, obj, offset, value);
            } else {
                // primitive over primitive in a plain own property
                skip = matches!(
                    self.host.describe_property(obj, offset),
                    Some(PropertyDescriptor::Plain { value: old }) if !old.is_object()
                );
            }
        }
        if skip {
            tracing::trace!(site, offset, "eliding primitive field write");
        }
        self.skip_logging.push(skip);
        Ok(native)
    }

    /// After a field write
    pub fn put_field(&mut self, site: Iid, base: &Value<H::Ref>, offset: &str, value: &Value<H::Ref>) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        let outcome = self.on_put_field(site, base, offset, value);
        self.settle(outcome)
    }

    fn on_put_field(&mut self, site: Iid, base: &Value<H::Ref>, offset: &str, value: &Value<H::Ref>) -> Result<()> {
        let skip = self.skip_logging.pop().unwrap_or_else(|| {
            tracing::warn!(site, offset, "field write without a matching pre-write event");
            false
        });
        let Some(obj) = base.as_object() else {
            return Ok(());
        };
        if let Some(base_id) = self.ids.find_obj_id(obj) {
            if !skip && !self.is_accessor(obj, offset) {
                let value_id = match value.as_object() {
                    Some(child) => self.resolve(child, site, false)?,
                    None => ObjectId::PRIMITIVE,
                };
                self.logger.log_putfield(site, base_id, offset, value_id)?;
            }
            self.touch(base_id, site);
        }
        self.natives.model_put_field(site, obj, offset, value);
        Ok(())
    }

    /// Assignment to a variable
    pub fn write(&mut self, site: Iid, name: &str, value: &Value<H::Ref>, old_value: &Value<H::Ref>) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        let outcome = self.on_write(site, name, value, old_value);
        self.settle(outcome)
    }

    fn on_write(&mut self, site: Iid, name: &str, value: &Value<H::Ref>, old_value: &Value<H::Ref>) -> Result<()> {
        let id = match value.as_object() {
            Some(obj) => {
                Self::check_write_name(site, name)?;
                self.resolve(obj, site, false)?
            }
            // a pointer overwritten by a primitive still drops a reference
            None if old_value.is_object() => {
                Self::check_write_name(site, name)?;
                ObjectId::PRIMITIVE
            }
            None => return Ok(()),
        };
        self.logger.log_write(site, name, id)
    }

    fn check_write_name(site: Iid, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(TraceError::InvalidWriteName { site });
        }
        Ok(())
    }

    /// Entry into an instrumented function body
    pub fn function_enter(
        &mut self,
        site: Iid,
        function: &Value<H::Ref>,
        receiver: &Value<H::Ref>,
        _args: &[Value<H::Ref>],
    ) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        let outcome = self.on_function_enter(site, function, receiver);
        self.pending_constructor = false;
        self.settle(outcome)
    }

    fn on_function_enter(&mut self, site: Iid, function: &Value<H::Ref>, receiver: &Value<H::Ref>) -> Result<()> {
        if self.pending_call_logged {
            // the caller already logged CALL
            self.pending_call_logged = false;
        } else if let Some(function) = function.as_object() {
            let fun_id = self.resolve(function, site, false)?;
            self.logger.log_function_enter(site, fun_id)?;
            // no invoke_fun will refresh this function's last use
            self.touch(fun_id, site);
        }

        let frame = match receiver.as_object() {
            Some(this) if !self.host.is_global_object(this) => {
                let (frame, this_id) = match self.ids.get_metadata(this) {
                    None => {
                        let id = self.resolve(this, site, false)?;
                        if self.pending_constructor {
                            let meta = ObjectIdentityManager::<H::Ref>::set_unannotated_this(id);
                            self.ids.set_metadata(this, meta);
                            (Some(meta), id)
                        } else {
                            // not known to be a constructor call
                            (None, id)
                        }
                    }
                    Some(meta) => (None, meta.id()),
                };
                self.logger.log_declare(site, THIS_BINDING, this_id)?;
                frame
            }
            _ => None,
        };
        self.call_frames.push(frame);
        Ok(())
    }

    /// Exit from an instrumented function body
    pub fn function_exit(
        &mut self,
        site: Iid,
        return_value: &Value<H::Ref>,
        _exception: Option<&Value<H::Ref>>,
    ) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        let outcome = self.on_function_exit(site, return_value);
        self.settle(outcome)
    }

    fn on_function_exit(&mut self, site: Iid, return_value: &Value<H::Ref>) -> Result<()> {
        let mut logged_return = false;
        if let Some(obj) = return_value.as_object() {
            if self.ids.has_metadata(obj) {
                let id = self.ids.find_extant_obj_id(obj, "functionExit", site)?;
                self.logger.log_return(id)?;
                logged_return = true;
            }
        }
        let frame = self.call_frames.pop().unwrap_or_else(|| {
            tracing::warn!(site, "function exit without a matching function enter");
            None
        });
        // An unannotated receiver with no explicit return is taken to be a
        // constructor exit. This is only an approximation: when the function
        // was invoked from uninstrumented code the RETURN is spurious.
        if let Some(meta) = frame {
            if meta.is_unannotated_this() && !logged_return {
                self.logger
                    .log_return(ObjectIdentityManager::<H::Ref>::extract_obj_id(meta))?;
            }
        }
        self.logger.log_function_exit(site)
    }

    /// Property read; only refreshes the base's last use
    pub fn get_field(&mut self, site: Iid, base: &Value<H::Ref>, _offset: &str, _value: &Value<H::Ref>) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        if let Some(id) = base.as_object().and_then(|obj| self.ids.find_obj_id(obj)) {
            self.touch(id, site);
        }
        Ok(())
    }

    /// Binary operator; `delete` removes a field from the graph
    pub fn binary(
        &mut self,
        site: Iid,
        op: &str,
        left: &Value<H::Ref>,
        right: &Value<H::Ref>,
        _result: &Value<H::Ref>,
    ) -> Result<()> {
        if !self.is_active() || op != DELETE_OPERATOR {
            return Ok(());
        }
        let outcome = self.on_delete(site, left, right);
        self.settle(outcome)
    }

    fn on_delete(&mut self, site: Iid, base: &Value<H::Ref>, offset: &Value<H::Ref>) -> Result<()> {
        let Some(base_id) = base.as_object().and_then(|obj| self.ids.find_obj_id(obj)) else {
            return Ok(());
        };
        if let Some(key) = offset.property_key() {
            self.logger.log_putfield(site, base_id, &key, ObjectId::PRIMITIVE)?;
            self.touch(base_id, site);
        }
        Ok(())
    }

    /// Start of a script; logs its instrumentation metadata
    pub fn script_enter(&mut self, site: Iid, file_name: &str) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        let outcome = self.on_script_enter(site, file_name);
        self.settle(outcome)
    }

    fn on_script_enter(&mut self, site: Iid, file_name: &str) -> Result<()> {
        let info = self.host.script_info(file_name);
        self.last_use.enter_script(info.script_id);
        let original = if info.original_file_name.is_empty() {
            file_name
        } else {
            info.original_file_name.as_str()
        };
        self.logger.log_script_enter(site, info.script_id, original)?;
        for (iid, position) in by_site(info.source_map) {
            self.logger.log_source_mapping(iid, position)?;
        }
        for (iid, names) in by_site(info.free_vars) {
            self.logger.log_free_vars(iid, names)?;
        }
        Ok(())
    }

    /// End of a script
    pub fn script_exit(&mut self, site: Iid) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        let outcome = self.logger.log_script_exit(site);
        self.last_use.exit_script();
        self.settle(outcome)
    }

    /// Free variables of functions produced by dynamic evaluation at
    /// `eval_site`
    pub fn instrument_code(&mut self, eval_site: Iid, functions: &[(Iid, FreeVars)]) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        tracing::debug!(eval_site, functions = functions.len(), "instrumenting evaluated code");
        let mut outcome = Ok(());
        for (enter_site, names) in functions {
            outcome = self.logger.log_free_vars(*enter_site, names.clone());
            if outcome.is_err() {
                break;
            }
        }
        self.settle(outcome)
    }

    /// End of a top-level expression: a candidate flush point
    pub fn end_expression(&mut self, site: Iid) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        let outcome = self.on_end_expression(site);
        self.settle(outcome)
    }

    fn on_end_expression(&mut self, site: Iid) -> Result<()> {
        if self.logger.segment_full() && self.logger.flush_point() != FlushPoint::Pending {
            self.last_use.flush_last_use(&mut self.logger)?;
            self.logger.flush_segment()?;
        }
        if self.logger.flush_point() == FlushPoint::Pending {
            self.logger
                .set_flush_point(self.last_use.current_script(), site);
            // provenance older than the flush point is never consulted
            self.ids.flush_native_obj_provenance();
        }
        Ok(())
    }

    /// Program finished; flush everything and finalize the sink
    pub fn end_execution(&mut self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        let outcome = self.on_end_execution();
        self.settle(outcome)
    }

    fn on_end_execution(&mut self) -> Result<()> {
        self.last_use.flush_last_use(&mut self.logger)?;
        self.logger.flush_segment()?;
        let done = Rc::clone(&self.done_logging);
        self.logger.end(Box::new(move || done.set(true)))?;
        self.state = TraceState::Finished;
        tracing::debug!(objects = self.ids.tracked_count(), "heap trace finished");
        Ok(())
    }

    /// Stop tracing; every later hook is a no-op
    pub fn stop_tracing(&mut self) {
        if self.is_active() {
            self.logger.stop_tracing();
            self.state = TraceState::Stopped;
        }
    }
}

/// Entries keyed by a numeric site, in ascending site order
fn by_site<T>(entries: BTreeMap<String, T>) -> Vec<(Iid, T)> {
    let mut sites: Vec<(Iid, T)> = entries
        .into_iter()
        .filter_map(|(key, entry)| match key.parse::<Iid>() {
            Ok(iid) => Some((iid, entry)),
            Err(_) => {
                tracing::trace!(key = key.as_str(), "skipping non-site metadata key");
                None
            }
        })
        .collect();
    sites.sort_unstable_by_key(|(iid, _)| *iid);
    sites
}
