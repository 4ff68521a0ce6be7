#![no_main]

use libfuzzer_sys::fuzz_target;
use tyger_dataplane::codec::BlockHeader;

fuzz_target!(|data: &[u8]| {
    if let Ok(header) = BlockHeader::decode(data) {
        let reencoded = header.encode();
        assert_eq!(&reencoded[..], &data[..reencoded.len()]);
    }
});
