#![no_main]

use libfuzzer_sys::fuzz_target;
use pldm_pdr::ChangeEvent;

fuzz_target!(|data: &[u8]| {
    if let Ok(event) = ChangeEvent::decode(data) {
        // Anything the decoder accepts must re-encode cleanly.
        let mut buf = [0u8; 512];
        let _ = event.encode(&mut buf);
    }
});
