//! Domain-separated Keccak-256 hashing (C2).
//!
//! Every hash in this crate that feeds into a commitment, a nullifier-style
//! binding, or a derived key is domain-separated: the same 32 random bytes
//! must hash to different outputs depending on what role they are playing.
//! The domain tags here are fixed strings from the design spec, not
//! configurable, so two independently-built instances of this crate always
//! agree on what `keccak(domain ‖ data)` means.

use sha3::{Digest, Keccak256};

/// Domain tag for NUMS generator derivation (see `bn254.rs`).
pub const DOMAIN_PEDERSEN_GENERATOR: &[u8] = b"pedersen-generator-rra-v1";
/// Domain tag for a single evidence commitment.
pub const DOMAIN_EVIDENCE: &[u8] = b"evidence";
/// Domain tag for Poseidon round-constant generation, parameterized by
/// sponge width `t`. Use [`poseidon_constants_domain`] to build the exact
/// per-width tag.
pub const DOMAIN_POSEIDON_CONSTANTS_PREFIX: &str = "poseidon_constants_t";
/// Domain tag for the v2 ECIES viewing-key encryption HKDF `info` parameter.
pub const DOMAIN_VIEWING_KEY_ENCRYPTION_V2: &[u8] = b"viewing_key_encryption_v2";
/// Domain tag (HKDF salt) for hierarchical viewing-key derivation.
pub const DOMAIN_VIEWING_KEY_DERIVATION_V1: &[u8] = b"rra-viewing-key-v1";
/// Retired ECIES HKDF `info` tag. Kept only so the retirement is documented
/// in one place; never passed to HKDF by this crate (see `SPEC_FULL.md`
/// section 9, open question 2).
#[allow(dead_code)]
pub const DOMAIN_ECIES_V1_RETIRED: &[u8] = b"rra-ecies-v1";

/// Builds the domain tag for a dispute's top-level evidence commitment:
/// `dispute:<id>`.
pub fn dispute_domain(dispute_id: &str) -> Vec<u8> {
    format!("dispute:{dispute_id}").into_bytes()
}

/// Builds the domain tag for one item within a dispute's evidence batch:
/// `dispute:<id>:item:<k>`.
pub fn dispute_item_domain(dispute_id: &str, index: usize) -> Vec<u8> {
    format!("dispute:{dispute_id}:item:{index}").into_bytes()
}

/// Builds the domain tag for Poseidon round-constant generation at a given
/// sponge width: `poseidon_constants_t<t>`.
pub fn poseidon_constants_domain(width: usize) -> Vec<u8> {
    format!("{DOMAIN_POSEIDON_CONSTANTS_PREFIX}{width}").into_bytes()
}

/// `keccak256(domain ‖ data)`, returned as a raw 32-byte digest.
pub fn domain_hash(domain: &[u8], data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

/// Reduces `keccak256(tag ‖ ':' ‖ data) mod n` into a BN254 scalar field
/// element, per the hash-to-scalar construction in the design spec. Note
/// the explicit `':'` separator: this differs from [`domain_hash`], which
/// concatenates its inputs directly and is used where the domain tag
/// already establishes unambiguous framing (e.g. fixed-width hash-to-curve
/// seeds).
pub fn hash_to_scalar(tag: &[u8], data: &[u8]) -> ark_bn254::Fr {
    use ark_ff::PrimeField;
    let mut hasher = Keccak256::new();
    hasher.update(tag);
    hasher.update(b":");
    hasher.update(data);
    let digest: [u8; 32] = hasher.finalize().into();
    ark_bn254::Fr::from_be_bytes_mod_order(&digest)
}

/// The evidence hash used by the commitment layer: `keccak256("evidence" ‖
/// payload)`.
pub fn evidence_hash(payload: &[u8]) -> [u8; 32] {
    domain_hash(DOMAIN_EVIDENCE, payload)
}
