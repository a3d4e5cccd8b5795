#![no_main]

use braid_relay::RelayMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = RelayMessage::parse(text);
    }
});
