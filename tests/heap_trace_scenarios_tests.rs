//! Heap trace scenarios through the public API
//!
//! Each test drives a `HookDispatcher` over a `ScriptedHeap` the way an
//! instrumented program would and checks the records that reach the sink.

use heaptrace::dispatcher::{HookDispatcher, TraceState};
use heaptrace::host::{InstrumentedFunction, Invocation};
use heaptrace::logger::{EventLogger, MemoryLogger, StreamLogger};
use heaptrace::options::TraceOptions;
use heaptrace::record::Record;
use heaptrace::scripted_heap::{Handle, ScriptedHeap};
use heaptrace::value::{ObjectId, Value};

fn dispatcher() -> (ScriptedHeap, HookDispatcher<ScriptedHeap, MemoryLogger>) {
    let heap = ScriptedHeap::new();
    let d = HookDispatcher::new(heap.clone(), MemoryLogger::new(), &TraceOptions::default()).unwrap();
    (heap, d)
}

fn call<'a>(
    site: u32,
    callee: &'a Value<Handle>,
    receiver: &'a Value<Handle>,
    is_constructor: bool,
) -> Invocation<'a, Handle> {
    Invocation {
        site,
        callee,
        receiver,
        args: &[],
        is_constructor,
        is_method: false,
    }
}

#[test]
fn test_scenario_literal_with_accessor() {
    // var o = { x: 1, get y() { return 2; } };
    let (heap, mut d) = dispatcher();
    let lit = heap.alloc_object();
    let getter = heap.alloc_function("get y", None);
    heap.set_plain(lit, "x", Value::Number(1.0));
    heap.define_accessor(lit, "y", Some(getter), None);

    d.literal(10, &Value::Object(lit), true).unwrap();
    d.declare(11, "o", &Value::Object(lit), false).unwrap();

    let getter_id = d.identity().find_obj_id(&getter).unwrap();
    let field_records: Vec<_> = d
        .logger()
        .records()
        .iter()
        .filter(|r| matches!(r, Record::PutField { .. }))
        .cloned()
        .collect();
    assert_eq!(
        field_records,
        vec![Record::PutField {
            site: 10,
            base_id: ObjectId(1),
            name: "get-y".into(),
            value_id: getter_id
        }]
    );
}

#[test]
fn test_scenario_delete_tracked_field() {
    let (heap, mut d) = dispatcher();
    let objects: Vec<_> = (0..5).map(|_| heap.alloc_object()).collect();
    for (i, o) in objects.iter().enumerate() {
        d.declare(i as u32 + 1, "v", &Value::Object(*o), false).unwrap();
    }
    let target = objects[4];
    assert_eq!(d.identity().find_obj_id(&target), Some(ObjectId(5)));
    heap.set_plain(target, "p", Value::Number(0.0));
    heap.delete(target, "p");

    d.binary(
        30,
        "delete",
        &Value::Object(target),
        &Value::Str("p".into()),
        &Value::Bool(true),
    )
    .unwrap();
    assert_eq!(
        d.logger().records().last(),
        Some(&Record::PutField {
            site: 30,
            base_id: ObjectId(5),
            name: "p".into(),
            value_id: ObjectId(0)
        })
    );
}

#[test]
fn test_scenario_constructor_with_unwritten_receiver() {
    // function F() {}  new F();
    let (heap, mut d) = dispatcher();
    let f = heap.alloc_function(
        "F",
        Some(InstrumentedFunction {
            enter_site: 50,
            stable_id: 1,
        }),
    );
    let this = heap.alloc_object();
    let callee = Value::Object(f);
    let receiver = Value::Object(this);

    let invocation = call(5, &callee, &receiver, true);
    d.invoke_fun_pre(&invocation).unwrap();
    d.function_enter(50, &callee, &receiver, &[]).unwrap();
    d.function_exit(51, &Value::Undefined, None).unwrap();
    d.invoke_fun(&invocation, &receiver).unwrap();

    let this_id = d.identity().find_obj_id(&this).unwrap();
    let records = d.logger().records();
    let exit_at = records
        .iter()
        .position(|r| *r == Record::FunctionExit { site: 51 })
        .unwrap();
    assert_eq!(records[exit_at - 1], Record::Return { id: this_id });
    assert_eq!(
        records
            .iter()
            .filter(|r| matches!(r, Record::Return { .. }))
            .count(),
        1
    );
}

#[test]
fn test_skip_logging_updates_last_use() {
    let (heap, mut d) = dispatcher();
    let o = heap.alloc_object();
    heap.set_plain(o, "count", Value::Number(0.0));
    let base = Value::Object(o);
    d.declare(1, "o", &base, false).unwrap();

    for i in 1..=3 {
        let value = Value::Number(f64::from(i));
        d.put_field_pre(2, &base, "count", &value).unwrap();
        heap.assign(o, "count", value.clone());
        d.put_field(2, &base, "count", &value).unwrap();
    }
    assert!(!d
        .logger()
        .records()
        .iter()
        .any(|r| matches!(r, Record::PutField { .. })));
    let last = d.last_use().last_use(ObjectId(1)).unwrap();
    assert_eq!(last.site.iid, 2);
    assert_eq!(last.time, d.logger().logical_time());
}

#[test]
fn test_callback_from_uninstrumented_code() {
    // [1].forEach(function cb() {}) : the native forEach calls cb directly
    let (heap, mut d) = dispatcher();
    let cb = heap.alloc_function(
        "cb",
        Some(InstrumentedFunction {
            enter_site: 70,
            stable_id: 3,
        }),
    );
    let for_each = heap.alloc_function("forEach", None);
    let callee = Value::Object(for_each);
    let invocation = call(6, &callee, &Value::Undefined, false);

    d.invoke_fun_pre(&invocation).unwrap();
    d.function_enter(70, &Value::Object(cb), &Value::Undefined, &[])
        .unwrap();
    d.function_exit(71, &Value::Undefined, None).unwrap();
    d.invoke_fun(&invocation, &Value::Undefined).unwrap();

    let records = d.logger().records();
    assert!(!records.iter().any(|r| matches!(r, Record::Call { .. })));
    let cb_id = d.identity().find_obj_id(&cb).unwrap();
    assert!(records.contains(&Record::FunctionEnter {
        site: 70,
        fun_id: cb_id
    }));
}

#[test]
fn test_stop_tracing_mid_run() {
    let (heap, mut d) = dispatcher();
    let o = Value::Object(heap.alloc_object());
    d.declare(1, "a", &o, false).unwrap();
    d.stop_tracing();
    d.declare(2, "b", &o, false).unwrap();
    d.end_execution().unwrap();
    assert_eq!(d.state(), TraceState::Stopped);
    assert_eq!(d.logger().records().len(), 2);
    assert!(!d.is_done_logging());
}

#[test]
fn test_stop_keeps_records_logged_before() {
    let heap = ScriptedHeap::new();
    let mut d = HookDispatcher::new(
        heap.clone(),
        StreamLogger::ascii(Vec::new()),
        &TraceOptions::default(),
    )
    .unwrap();
    let o = Value::Object(heap.alloc_object());
    d.declare(1, "a", &o, false).unwrap();
    d.stop_tracing();
    d.declare(2, "b", &o, false).unwrap();
    d.end_execution().unwrap();

    let (_, logger) = d.into_parts();
    let text = String::from_utf8(logger.into_inner()).unwrap();
    assert_eq!(text, "CREATE_OBJ,0:1,1\nDECLARE,1,a,1\n");
}

#[test]
fn test_abort_keeps_records_logged_before() {
    let heap = ScriptedHeap::new();
    let mut d = HookDispatcher::new(
        heap.clone(),
        StreamLogger::ascii(Vec::new()),
        &TraceOptions::default(),
    )
    .unwrap();
    let o = Value::Object(heap.alloc_object());
    d.declare(1, "a", &o, false).unwrap();
    // an empty binding name is fatal
    assert!(d.write(2, "", &o, &Value::Undefined).is_err());
    assert_eq!(d.state(), TraceState::Aborted);
    d.end_execution().unwrap();

    let (_, logger) = d.into_parts();
    let text = String::from_utf8(logger.into_inner()).unwrap();
    assert_eq!(text, "CREATE_OBJ,0:1,1\nDECLARE,1,a,1\n");
}

#[test]
fn test_ascii_sink_trace() {
    let heap = ScriptedHeap::new();
    let mut d = HookDispatcher::new(
        heap.clone(),
        StreamLogger::ascii(Vec::new()),
        &TraceOptions::default(),
    )
    .unwrap();
    let o = heap.alloc_object();
    let child = heap.alloc_object();
    let base = Value::Object(o);
    let value = Value::Object(child);
    d.declare(1, "o", &base, false).unwrap();
    d.put_field_pre(2, &base, "next", &value).unwrap();
    heap.assign(o, "next", value.clone());
    d.put_field(2, &base, "next", &value).unwrap();
    d.end_expression(3).unwrap();
    d.end_execution().unwrap();
    assert!(d.is_done_logging());
    assert_eq!(d.logger().logical_time(), 7);

    let (_, logger) = d.into_parts();
    let text = String::from_utf8(logger.into_inner()).unwrap();
    assert_eq!(
        text,
        "CREATE_OBJ,0:1,1\n\
         DECLARE,1,o,1\n\
         CREATE_OBJ,0:2,2\n\
         PUTFIELD,2,1,next,2\n\
         LAST_USE,1,0:2,4\n\
         LAST_USE,2,0:2,3\n\
         TOP_LEVEL_FLUSH,0:3\n"
    );
}
