#![no_main]

use std::sync::OnceLock;

use hashchain_otp::{ser::decode_otp_proof, Authenticator, Verifier};
use libfuzzer_sys::fuzz_target;

fn fixture() -> &'static (Authenticator, Verifier) {
    static FIXTURE: OnceLock<(Authenticator, Verifier)> = OnceLock::new();
    FIXTURE.get_or_init(|| {
        let auth = Authenticator::init(256, 64, 2, 0, Some("fuzz fixture wallet"), None).unwrap();
        let first = auth.child_rotation(0).unwrap();
        let verifier = Verifier::deploy(*auth.config(), auth.root(), 0, "owner", &first).unwrap();
        (auth, verifier)
    })
}

fuzz_target!(|data: &[u8]| {
    let (auth, verifier) = fixture();
    let Ok(proof) = decode_otp_proof(data) else { return };
    let mut v = verifier.clone();
    if v.confirm_operation(&proof.audit_path, &proof.credential, proof.otp_id).is_ok() {
        // Only the honestly derived credential may pass.
        let honest = auth.confirm_material(proof.otp_id).unwrap();
        assert_eq!(honest.proof.credential, proof.credential);
    }
});
