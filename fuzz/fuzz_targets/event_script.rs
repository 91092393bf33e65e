#![no_main]

use heaptrace::logger::MemoryLogger;
use heaptrace::options::TraceOptions;
use heaptrace::replay::{replay, EventScript};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(script) = EventScript::from_json(input) {
            // Any well-formed script replays to an outcome or an error
            let _ = replay(&script, MemoryLogger::new(), &TraceOptions::default());
        }
    }
});
