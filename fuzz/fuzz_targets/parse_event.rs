#![no_main]

use braid_core::event::{Event, validate_event};
use braid_core::tags;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(event) = serde_json::from_slice::<Event>(data) else {
        return;
    };
    let _ = validate_event(&event);
    let parsed = tags::parse(event);
    let _ = parsed.record.type_name();
});
