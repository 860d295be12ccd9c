#![no_main]

use libfuzzer_sys::fuzz_target;
use pldm_pdr::responder;
use pldm_pdr::PdrRepo;

fuzz_target!(|data: &[u8]| {
    let Some((&command, request)) = data.split_first() else {
        return;
    };
    let mut repo = PdrRepo::with_capacity(512);
    let _ = repo.add_record(1, &[0xAA, 0xBB]);
    let _ = repo.add_record(2, &[0xCC]);

    let mut response = [0u8; 512];
    let _ = responder::handle_request(&mut repo, command, request, &mut response, None);
});
