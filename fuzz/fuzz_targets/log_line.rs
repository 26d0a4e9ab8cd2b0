#![no_main]

use libfuzzer_sys::fuzz_target;
use motelab_core::parse_log_line;

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = std::str::from_utf8(data) {
        if let Ok(event) = parse_log_line(line) {
            // Rendering a parsed event must parse back to the same time and node
            let again = parse_log_line(&event.to_log_line()).expect("rendered line parses");
            assert_eq!(again.time.as_millis(), event.time.as_millis());
            assert_eq!(again.node, event.node);
        }
    }
});
