//! Client/verifier rotation flows: child subtrees, the three-stage parent
//! rotation, burned credentials and wallet destruction.

use hashchain_otp::{
    commitment, commitment_key, hash_n, Authenticator, ConfirmMaterial, Node, OtpError,
    ParentStage, RotationState, SlotKind, Verifier,
};

const MNEMONIC: &str = "ocean lantern mirror cobalt";
const OWNER: &str = "0xowner";

fn wallet(num_leaves: u64, sub: u64, chain_len: u32) -> (Authenticator, Verifier) {
    let auth = Authenticator::init(num_leaves, sub, chain_len, 0, Some(MNEMONIC), None).unwrap();
    let first = auth.child_rotation(0).unwrap();
    let verifier = Verifier::deploy(*auth.config(), auth.root(), 0, OWNER, &first).unwrap();
    (auth, verifier)
}

fn confirm(auth: &Authenticator, verifier: &mut Verifier, otp_id: u64) -> Result<(), OtpError> {
    let m = auth.confirm_material(otp_id)?;
    verifier.confirm_operation(&m.proof.audit_path, &m.proof.credential, otp_id).map(|_| ())
}

/// Spend the ordinary slots of the current subtree and rotate to the next one.
fn rotate_child(auth: &mut Authenticator, verifier: &mut Verifier) {
    let per = auth.config().child_otps_per_subtree();
    let offset = auth.offset_of_current_subtree();
    confirm(auth, verifier, offset + per - 3).unwrap();
    assert_eq!(verifier.state(), &RotationState::SubtreeLow);
    let m = auth.confirm_material(offset + per - 2).unwrap();
    verifier.rotate_child_tree(&m.proof, m.child_rotation.as_ref().unwrap()).unwrap();
    auth.advance_subtree().unwrap();
}

#[test]
fn child_rotation_moves_both_sides_forward() {
    let (mut auth, mut verifier) = wallet(16, 4, 1);
    confirm(&auth, &mut verifier, 0).unwrap();
    assert_eq!(verifier.state(), &RotationState::Active);
    confirm(&auth, &mut verifier, 1).unwrap();
    assert_eq!(verifier.state(), &RotationState::SubtreeLow);

    let m: ConfirmMaterial = auth.confirm_material(2).unwrap();
    assert_eq!(m.kind, SlotKind::SubtreeLow { last_subtree: false });
    let rotation = m.child_rotation.clone().unwrap();
    assert_eq!(rotation.subtree_idx, 1);
    assert_eq!(verifier.rotate_child_tree(&m.proof, &rotation).unwrap(), 1);
    assert_eq!(auth.advance_subtree().unwrap(), 1);

    assert_eq!(verifier.current_subtree_idx(), 1);
    assert_eq!(verifier.next_otp(), 4);
    assert_eq!(verifier.cached_layer(), &rotation.cached_layer);
    assert_eq!(verifier.state(), &RotationState::Active);
    confirm(&auth, &mut verifier, 4).unwrap();
}

#[test]
fn reserved_slots_never_authorize_operations() {
    let (auth, mut verifier) = wallet(16, 4, 1);
    let m = auth.confirm_material(2).unwrap();
    assert!(matches!(
        verifier.confirm_operation(&m.proof.audit_path, &m.proof.credential, 2),
        Err(OtpError::Exhausted { otp_id: 2, .. })
    ));
    assert_eq!(verifier.next_otp(), 0);
}

#[test]
fn child_rotation_requires_subtree_low() {
    let (auth, mut verifier) = wallet(16, 4, 1);
    let m = auth.confirm_material(2).unwrap();
    let rotation = m.child_rotation.as_ref().unwrap();
    let err = verifier.rotate_child_tree(&m.proof, rotation).unwrap_err();
    assert_eq!(err, OtpError::RotationOrder { operation: "rotate child tree", state: "Active" });
    assert_eq!(verifier.current_subtree_idx(), 0);
}

#[test]
fn failed_child_rotation_burns_credential_and_margin_slot_retries() {
    let (auth, mut verifier) = wallet(16, 4, 1);
    confirm(&auth, &mut verifier, 1).unwrap();

    let low = auth.confirm_material(2).unwrap();
    let wrong = auth.child_rotation(2).unwrap();
    assert!(matches!(
        verifier.rotate_child_tree(&low.proof, &wrong),
        Err(OtpError::OutOfRange { what: "child subtree index", .. })
    ));
    assert_eq!(verifier.next_otp(), 3);
    assert_eq!(verifier.current_subtree_idx(), 0);

    let rotation = low.child_rotation.clone().unwrap();
    assert!(matches!(
        verifier.rotate_child_tree(&low.proof, &rotation),
        Err(OtpError::Replay { otp_id: 2, next: 3 })
    ));

    let margin = auth.confirm_material(3).unwrap();
    assert_eq!(margin.kind, SlotKind::SafetyMargin { last_subtree: false });
    let retry = margin.child_rotation.as_ref().unwrap();
    assert_eq!(verifier.rotate_child_tree(&margin.proof, retry).unwrap(), 1);
}

#[test]
fn tampered_layer_is_rejected_after_burn() {
    let (auth, mut verifier) = wallet(16, 4, 1);
    confirm(&auth, &mut verifier, 1).unwrap();
    let m = auth.confirm_material(2).unwrap();
    let mut rotation = m.child_rotation.clone().unwrap();
    rotation.cached_layer.nodes[0].0[3] ^= 0x40;
    assert!(matches!(
        verifier.rotate_child_tree(&m.proof, &rotation),
        Err(OtpError::ProofMismatch { .. })
    ));
    assert_eq!(verifier.next_otp(), 3);
}

#[test]
fn wrong_credential_does_not_burn() {
    let (auth, mut verifier) = wallet(16, 4, 1);
    let m = auth.confirm_material(0).unwrap();
    let mut forged = m.proof.credential;
    forged.0[0] ^= 1;
    assert!(matches!(
        verifier.confirm_operation(&m.proof.audit_path, &forged, 0),
        Err(OtpError::ProofMismatch { .. })
    ));
    assert_eq!(verifier.next_otp(), 0);
    confirm(&auth, &mut verifier, 0).unwrap();
}

#[test]
fn full_path_is_rejected_where_a_short_path_is_expected() {
    let (auth, mut verifier) = wallet(64, 16, 2);
    let m = auth.confirm_material(5).unwrap();
    let full = auth.full_auth_path(5).unwrap();
    assert_eq!(full.len(), 6);
    assert!(matches!(
        verifier.confirm_operation(&full, &m.proof.credential, 5),
        Err(OtpError::InvalidLength { expected: 3, got: 6 })
    ));
    verifier.confirm_operation(&m.proof.audit_path, &m.proof.credential, 5).unwrap();
}

#[test]
fn deploy_checks_first_child() {
    let auth = Authenticator::init(16, 4, 1, 0, Some(MNEMONIC), None).unwrap();
    let second = auth.child_rotation(1).unwrap();
    assert!(matches!(
        Verifier::deploy(*auth.config(), auth.root(), 0, OWNER, &second),
        Err(OtpError::OutOfRange { .. })
    ));
    let first = auth.child_rotation(0).unwrap();
    assert!(matches!(
        Verifier::deploy(*auth.config(), Node([9; 16]), 0, OWNER, &first),
        Err(OtpError::ProofMismatch { .. })
    ));
}

#[test]
fn parent_rotation_three_stages() {
    let (mut auth, mut verifier) = wallet(16, 4, 1);
    for _ in 0..3 {
        rotate_child(&mut auth, &mut verifier);
    }
    assert_eq!(auth.current_subtree_idx(), 3);
    confirm(&auth, &mut verifier, 13).unwrap();
    assert_eq!(verifier.state(), &RotationState::ParentLow);
    assert!(matches!(auth.confirm_material(14), Err(OtpError::Exhausted { otp_id: 14, .. })));
    assert!(matches!(auth.advance_subtree(), Err(OtpError::RotationOrder { .. })));

    let plan = auth.prepare_parent_rotation(None).unwrap();
    assert_eq!(plan.new_parent_tree_idx, 1);
    assert_eq!(plan.commitment, plan.expected_commitment());
    assert_eq!(plan.commitment_key, plan.expected_commitment_key());
    assert_eq!((plan.reveal.otp_id, plan.finalize.otp_id), (14, 15));

    assert!(matches!(
        verifier.finalize_parent_rotation(&plan.finalize, &plan.first_child),
        Err(OtpError::RotationOrder { .. })
    ));
    assert!(verifier.commit_parent_root(plan.commitment_key, plan.commitment).unwrap());
    assert!(matches!(verifier.state(), RotationState::RotatingParent(ParentStage::Committed(_))));
    verifier.reveal_parent_root(plan.new_root, &plan.reveal).unwrap();
    assert_eq!(
        verifier.state(),
        &RotationState::RotatingParent(ParentStage::Revealed { new_root: plan.new_root })
    );
    assert!(matches!(
        verifier.commit_parent_root(plan.commitment_key, plan.commitment),
        Err(OtpError::RotationOrder { .. })
    ));
    assert_eq!(verifier.finalize_parent_rotation(&plan.finalize, &plan.first_child).unwrap(), 1);

    assert_eq!(auth.generate_next_parent_tree(None).unwrap(), plan.new_root);
    assert_eq!(verifier.root_hash(), auth.root());
    assert_eq!(verifier.parent_tree_idx(), 1);
    assert_eq!(auth.parent_tree_idx(), 1);
    assert_eq!((verifier.current_subtree_idx(), verifier.next_otp()), (0, 0));
    assert_eq!(auth.current_subtree_idx(), 0);
    confirm(&auth, &mut verifier, 0).unwrap();
}

#[test]
fn parent_rotation_with_fresh_seed() {
    let (mut auth, mut verifier) = wallet(8, 4, 1);
    rotate_child(&mut auth, &mut verifier);
    confirm(&auth, &mut verifier, 5).unwrap();
    let seed_hex = "11".repeat(32);
    let plan = auth.prepare_parent_rotation(Some(&seed_hex)).unwrap();
    let same_seed = auth.prepare_parent_rotation(None).unwrap();
    assert_ne!(plan.new_root, same_seed.new_root);

    verifier.commit_parent_root(plan.commitment_key, plan.commitment).unwrap();
    verifier.reveal_parent_root(plan.new_root, &plan.reveal).unwrap();
    verifier.finalize_parent_rotation(&plan.finalize, &plan.first_child).unwrap();
    assert_eq!(auth.generate_next_parent_tree(Some(&seed_hex)).unwrap(), verifier.root_hash());
}

#[test]
fn junk_commitments_cannot_lock_out_the_owner() {
    let (mut auth, mut verifier) = wallet(8, 4, 1);
    rotate_child(&mut auth, &mut verifier);
    let plan = auth.prepare_parent_rotation(None).unwrap();

    assert!(matches!(
        verifier.commit_parent_root(plan.commitment_key, plan.commitment),
        Err(OtpError::RotationOrder { .. })
    ));
    confirm(&auth, &mut verifier, 5).unwrap();

    for i in 0..32u8 {
        assert!(verifier.commit_parent_root(Node([i; 16]), Node([i ^ 0xff; 16])).unwrap());
    }
    assert!(matches!(
        verifier.reveal_parent_root(plan.new_root, &plan.reveal),
        Err(OtpError::ProofMismatch { context: "no stage-1 commitment for this credential", .. })
    ));
    assert_eq!(verifier.next_otp(), 6);

    assert!(verifier.commit_parent_root(plan.commitment_key, plan.commitment).unwrap());
    assert!(!verifier.commit_parent_root(plan.commitment_key, plan.commitment).unwrap());
    assert!(matches!(
        verifier.reveal_parent_root(plan.new_root, &plan.finalize),
        Err(OtpError::OutOfRange { what: "reveal otp id", .. })
    ));
    verifier.reveal_parent_root(plan.new_root, &plan.reveal).unwrap();
    assert_eq!(verifier.finalize_parent_rotation(&plan.finalize, &plan.first_child).unwrap(), 1);
    assert_eq!(auth.generate_next_parent_tree(None).unwrap(), verifier.root_hash());
}

#[test]
fn later_commitment_under_the_same_key_cannot_replace_the_root() {
    let (mut auth, mut verifier) = wallet(8, 4, 1);
    rotate_child(&mut auth, &mut verifier);
    confirm(&auth, &mut verifier, 5).unwrap();
    let plan = auth.prepare_parent_rotation(None).unwrap();
    assert!(verifier.commit_parent_root(plan.commitment_key, plan.commitment).unwrap());

    // Once the reveal credential is public anyone can bind it to another root.
    let cred = plan.reveal.credential;
    let evil = Node([0xee; 16]);
    assert!(!verifier.commit_parent_root(commitment_key(&cred), commitment(&evil, &cred)).unwrap());
    assert!(matches!(
        verifier.reveal_parent_root(evil, &plan.reveal),
        Err(OtpError::ProofMismatch { context: "revealed root vs stage-1 commitment", .. })
    ));
    assert_eq!(verifier.next_otp(), 6);
    assert!(matches!(verifier.state(), RotationState::RotatingParent(ParentStage::Committed(_))));

    verifier.reveal_parent_root(plan.new_root, &plan.reveal).unwrap();
    assert_eq!(verifier.next_otp(), 7);
    assert_eq!(verifier.finalize_parent_rotation(&plan.finalize, &plan.first_child).unwrap(), 1);
    assert_eq!(auth.generate_next_parent_tree(None).unwrap(), verifier.root_hash());
}

#[test]
fn commitment_without_the_key_cannot_be_revealed() {
    let (mut auth, mut verifier) = wallet(8, 4, 1);
    rotate_child(&mut auth, &mut verifier);
    confirm(&auth, &mut verifier, 5).unwrap();
    let plan = auth.prepare_parent_rotation(None).unwrap();

    // The leaf of the reveal chain is public; keying by it must not match.
    let public_leaf = hash_n(&plan.reveal.credential, 1);
    assert!(verifier.commit_parent_root(public_leaf, plan.commitment).unwrap());
    assert!(matches!(
        verifier.reveal_parent_root(plan.new_root, &plan.reveal),
        Err(OtpError::ProofMismatch { .. })
    ));
    assert!(verifier.commit_parent_root(plan.commitment_key, plan.commitment).unwrap());
    verifier.reveal_parent_root(plan.new_root, &plan.reveal).unwrap();
}

#[test]
fn finalize_checks_first_child_against_revealed_root() {
    let (mut auth, mut verifier) = wallet(8, 4, 1);
    rotate_child(&mut auth, &mut verifier);
    confirm(&auth, &mut verifier, 5).unwrap();
    let plan = auth.prepare_parent_rotation(None).unwrap();
    verifier.commit_parent_root(plan.commitment_key, plan.commitment).unwrap();
    verifier.reveal_parent_root(plan.new_root, &plan.reveal).unwrap();

    let stale_child = auth.child_rotation(0).unwrap();
    assert!(matches!(
        verifier.finalize_parent_rotation(&plan.finalize, &stale_child),
        Err(OtpError::ProofMismatch { .. })
    ));
    assert_eq!(verifier.parent_tree_idx(), 0);
    assert_eq!(verifier.next_otp(), 8);
}

#[test]
fn destroy_is_owner_only_and_terminal() {
    let (auth, mut verifier) = wallet(16, 4, 1);
    assert_eq!(verifier.destroy("0xmallory"), Err(OtpError::Unauthorized));
    assert_eq!(verifier.owner(), OWNER);
    verifier.destroy(OWNER).unwrap();
    assert_eq!(verifier.state(), &RotationState::Destroyed);
    assert_eq!(confirm(&auth, &mut verifier, 0), Err(OtpError::Destroyed));
    assert_eq!(verifier.commit_parent_root(Node::ZERO, Node::ZERO), Err(OtpError::Destroyed));
    assert_eq!(verifier.destroy(OWNER), Err(OtpError::Destroyed));
}

#[test]
fn end_to_end_with_cached_layer_and_long_chains() {
    let (mut auth, mut verifier) = wallet(64, 16, 2);
    assert_eq!(verifier.cached_layer().depth, 1);
    let per = auth.config().child_otps_per_subtree();
    for subtree in 0..3 {
        let offset = subtree * per;
        for otp_id in [offset, offset + 17] {
            confirm(&auth, &mut verifier, otp_id).unwrap();
        }
        rotate_child(&mut auth, &mut verifier);
    }
    confirm(&auth, &mut verifier, 3 * per + per - 3).unwrap();
    assert_eq!(verifier.state(), &RotationState::ParentLow);
    let plan = auth.prepare_parent_rotation(None).unwrap();
    verifier.commit_parent_root(plan.commitment_key, plan.commitment).unwrap();
    verifier.reveal_parent_root(plan.new_root, &plan.reveal).unwrap();
    verifier.finalize_parent_rotation(&plan.finalize, &plan.first_child).unwrap();
    auth.generate_next_parent_tree(None).unwrap();
    confirm(&auth, &mut verifier, 20).unwrap();
    assert_eq!(verifier.next_otp(), 21);
}
