#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Truncated or garbage traces must be rejected, never panic
    let _ = heaptrace::logger::decode_trace(data);
});
