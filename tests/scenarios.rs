//! Black-box scenarios exercising the crate's public API end to end, one
//! per top-level capability: evidence commitments, homomorphic
//! aggregation, threshold escrow, viewing-key encryption, DID
//! challenge-response, and Poseidon determinism.

use std::collections::HashMap;

use ark_bn254::Fr;
use rra_crypto_core::*;
use secp256k1::ecdsa::RecoverableSignature;
use secp256k1::{Message, Secp256k1, SecretKey as Secp256k1SecretKey};
use sha3::{Digest, Keccak256};

#[test]
fn evidence_commit_reveal_verify_round_trip_and_tamper_detection() {
    // Scenario S1 from the design spec.
    let mut manager = EvidenceCommitmentManager::new();
    let evidence = b"proof.pdf content";

    let proof = manager
        .commit_dispute_evidence("D-42", evidence)
        .unwrap();
    let (evidence_hash, blinding) = manager.reveal_evidence("D-42", evidence).unwrap();
    assert!(verify_evidence_commitment(&proof, &evidence_hash, &blinding).unwrap());
    assert!(manager.verify_revelation("D-42", evidence, &blinding).unwrap());

    let mut tampered = evidence.to_vec();
    tampered[0] ^= 0xff;
    assert!(!manager.verify_revelation("D-42", &tampered, &blinding).unwrap());
}

#[test]
fn aggregation_is_homomorphic_over_independent_commitments() {
    let c1 = commit(Fr::from(5u64), Fr::from(7u64)).unwrap();
    let c2 = commit(Fr::from(11u64), Fr::from(13u64)).unwrap();
    let aggregated = aggregate(&[c1, c2]).unwrap();
    let expected = commit(Fr::from(16u64), Fr::from(20u64)).unwrap();
    assert_eq!(aggregated, expected);
}

#[test]
fn three_of_five_escrow_reconstructs_from_any_quorum_and_fails_closed_otherwise() {
    let holders: Vec<String> = (0..5).map(|i| format!("holder-{i}")).collect();
    let config = ThresholdConfig::new(3, 5, holders.clone()).unwrap();
    let secret = [42u8; 32];

    let share_map = EscrowManager::escrow(&secret, &config, "dispute-s3").unwrap();
    let all_shares: Vec<KeyShare> = holders.iter().map(|h| share_map[h].clone()).collect();

    // Any 3 of the 5 shares reconstruct the secret.
    let quorum_a: Vec<KeyShare> = all_shares[0..3].to_vec();
    let quorum_b: Vec<KeyShare> = vec![all_shares[1].clone(), all_shares[3].clone(), all_shares[4].clone()];
    assert_eq!(EscrowManager::recover("dispute-s3", &quorum_a).unwrap(), secret);
    assert_eq!(EscrowManager::recover("dispute-s3", &quorum_b).unwrap(), secret);

    // Fewer than the threshold fails closed.
    let too_few: Vec<KeyShare> = all_shares[0..2].to_vec();
    assert!(matches!(
        EscrowManager::recover("dispute-s3", &too_few),
        Err(CoreError::InsufficientShares { .. })
    ));

    // A tampered share's value is detected at reconstruction.
    let mut tampered = quorum_a.clone();
    tampered[0].value[0] ^= 0xff;
    assert!(matches!(
        EscrowManager::recover("dispute-s3", &tampered),
        Err(CoreError::CommitmentMismatch)
    ));
}

#[test]
fn viewing_key_round_trip_succeeds_and_a_second_key_is_rejected() {
    let key = ViewingKey::generate(
        ViewingKeyPurpose::DisputeEvidence,
        "dispute-s4",
        None,
        HashMap::new(),
    );
    let encrypted = encrypt_with_viewing_key(&key, b"confidential transcript bytes").unwrap();
    let decrypted = decrypt_with_viewing_key(&key, &encrypted).unwrap();
    assert_eq!(decrypted, b"confidential transcript bytes");

    let other_key = ViewingKey::generate(
        ViewingKeyPurpose::DisputeEvidence,
        "dispute-s4",
        None,
        HashMap::new(),
    );
    assert!(matches!(
        decrypt_with_viewing_key(&other_key, &encrypted),
        Err(CoreError::KeyMismatch)
    ));
}

#[tokio::test]
async fn ethr_did_challenge_response_succeeds_once_and_rejects_replay() {
    let secp = Secp256k1::new();
    let secret_key = Secp256k1SecretKey::new(&mut secp256k1::rand::thread_rng());
    let public_key = secret_key.public_key(&secp);
    let uncompressed = public_key.serialize_uncompressed();
    let address_hash = Keccak256::digest(&uncompressed[1..]);
    let address = format!("0x{}", hex::encode(&address_hash[12..32]));
    let did = format!("did:ethr:{address}");

    let authenticator = DidAuthenticator::new(DidResolver::new());
    let challenge = authenticator.create_challenge(&did, "login").await.unwrap();

    let to_sign = challenge.to_sign_bytes();
    let prefix = format!("\x19Ethereum Signed Message:\n{}", to_sign.len());
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(&to_sign);
    let digest: [u8; 32] = hasher.finalize().into();
    let message = Message::from_digest_slice(&digest).unwrap();
    let recoverable: RecoverableSignature = secp.sign_ecdsa_recoverable(&message, &secret_key);
    let (recovery_id, sig_bytes) = recoverable.serialize_compact();
    let mut signature = sig_bytes.to_vec();
    signature.push(recovery_id.to_i32() as u8);

    let result = authenticator
        .verify_challenge(&challenge.id, &signature, None)
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.did, did);

    let replay = authenticator
        .verify_challenge(&challenge.id, &signature, None)
        .await;
    assert!(matches!(replay, Err(CoreError::ChallengeNotFound)));
}

#[test]
fn poseidon_hash_is_deterministic_and_input_sensitive() {
    let a = Poseidon::hash(&[Fr::from(1u64)]);
    let b = Poseidon::hash(&[Fr::from(1u64)]);
    let c = Poseidon::hash(&[Fr::from(2u64)]);
    assert_eq!(a, b);
    assert_ne!(a, c);

    let bytes = Poseidon::hash_to_bytes(&[Fr::from(1u64)]);
    assert_eq!(bytes.len(), 32);
}
