#![no_main]

use hashchain_otp::ser::{decode_cached_layer, decode_otp_proof, encode_otp_proof};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(proof) = decode_otp_proof(data) {
        assert_eq!(encode_otp_proof(&proof), data);
    }
    let _ = decode_cached_layer(data);
});
