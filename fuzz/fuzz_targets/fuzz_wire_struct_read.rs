#![no_main]

use libfuzzer_sys::fuzz_target;
use pldm_pdr::formats::PdrHeader;
use pldm_pdr::transport::{
    FindPdrRequest, GetPdrRequest, GetPdrResponseHeader, RepoInfoResponse, SignatureResponse,
};

fuzz_target!(|data: &[u8]| {
    let _ = PdrHeader::parse(data);
    let _ = GetPdrRequest::read(&mut &data[..]);
    let _ = GetPdrResponseHeader::read(&mut &data[..]);
    let _ = FindPdrRequest::read(&mut &data[..]);
    let _ = RepoInfoResponse::read(&mut &data[..]);
    let _ = SignatureResponse::read(&mut &data[..]);
});
