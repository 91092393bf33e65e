//! heaptrace - heap graph tracer for instrumented dynamic-language programs
//!
//! The host runtime reports heap events (declarations, field writes, calls,
//! function entry and exit) to a [`dispatcher::HookDispatcher`], which assigns
//! stable ids to heap objects and writes a compact trace of how the object
//! graph evolves. An offline consumer rebuilds the graph and per-object
//! liveness from the trace.

pub mod cli;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod identity;
pub mod last_use;
pub mod logger;
pub mod logical_clock;
pub mod options;
pub mod record;
pub mod replay;
pub mod scripted_heap;
pub mod value;
