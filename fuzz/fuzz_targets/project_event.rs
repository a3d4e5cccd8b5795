#![no_main]

use braid_core::db::open_in_memory;
use braid_core::db::project::Projector;
use braid_core::event::{EventBuilder, EventKind, Keys};
use libfuzzer_sys::fuzz_target;

// Input: kind (u16 little endian), then NUL-separated tag fields with `\n`
// between tags, then `\0\0` and the content. The event is signed so it
// passes validation and reaches the reducers.
fuzz_target!(|data: &[u8]| {
    let Some((kind, rest)) = data.split_first_chunk::<2>() else {
        return;
    };
    let Ok(rest) = std::str::from_utf8(rest) else {
        return;
    };
    let (raw_tags, content) = rest.split_once("\0\0").unwrap_or((rest, ""));
    let tags: Vec<Vec<String>> = raw_tags
        .split('\n')
        .filter(|t| !t.is_empty())
        .map(|t| t.split('\0').map(ToString::to_string).collect())
        .collect();

    let keys = Keys::from_secret_bytes([42u8; 32]);
    let event = EventBuilder::new(EventKind::from(u32::from(u16::from_le_bytes(*kind))), content)
        .tags(tags)
        .created_at(1_700_000_000)
        .sign(&keys);

    let conn = open_in_memory().expect("in-memory projection");
    let projector = Projector::new(&conn);
    let _ = projector.ingest_event(&event, Some("wss://fuzz"));
    let _ = projector.ingest_event(&event, None);
});
