#![no_main]

use libfuzzer_sys::fuzz_target;
use tyger_core::{Buffer, Codespec, Run};

fuzz_target!(|data: &[u8]| {
    let Ok(json_str) = std::str::from_utf8(data) else { return };

    if let Ok(buffer) = serde_json::from_str::<Buffer>(json_str) {
        if let Ok(roundtripped) = serde_json::to_string(&buffer) {
            if let Ok(parsed) = serde_json::from_str::<Buffer>(&roundtripped) {
                assert_eq!(buffer.id, parsed.id);
                assert_eq!(buffer.tags, parsed.tags);
            }
        }
    }

    if let Ok(codespec) = serde_json::from_str::<Codespec>(json_str) {
        if let Ok(roundtripped) = serde_json::to_string(&codespec) {
            if let Ok(parsed) = serde_json::from_str::<Codespec>(&roundtripped) {
                assert_eq!(codespec, parsed);
            }
        }
    }

    if let Ok(run) = serde_json::from_str::<Run>(json_str) {
        if let Ok(roundtripped) = serde_json::to_string(&run) {
            if let Ok(parsed) = serde_json::from_str::<Run>(&roundtripped) {
                assert_eq!(run.id, parsed.id);
                assert_eq!(run.status, parsed.status);
            }
        }
    }
});
