//! Identity secret generation and its Poseidon commitment (spec section 3,
//! "Identity secret & hash").
//!
//! A dispute participant's identity secret never leaves this struct's
//! owner; only [`DisputeIdentity::identity_hash`] (a Poseidon hash) is
//! registered on chain, and an external ZK prover proves knowledge of the
//! secret behind that hash without revealing it.

use ark_bn254::Fr;
use ark_ff::PrimeField;
use rand_core::{OsRng, RngCore};
use sha3::{Digest, Keccak256};

use crate::error::{CoreError, CoreResult};
use crate::poseidon::Poseidon;

/// An identity secret together with its public Poseidon commitment.
#[derive(Debug, Clone)]
pub struct DisputeIdentity {
    /// Private: never serialized to chain or logs.
    pub identity_secret: [u8; 32],
    /// Public: `Poseidon([identity_secret])`, serialized as 32 big-endian
    /// bytes.
    pub identity_hash: [u8; 32],
    /// Extra entropy mixed into address-bound derivation; otherwise just
    /// the random bytes used to generate a pure-random secret.
    pub salt: [u8; 32],
    /// Ethereum address this identity is bound to, if derived that way.
    pub address: Option<String>,
}

/// Generates a fresh identity secret. Binds to `address` by hashing
/// `keccak(address_padded_to_20B ‖ salt)` when given one; otherwise the
/// secret is 32 uniformly random bytes.
pub fn generate_identity(address: Option<&str>, custom_salt: Option<[u8; 32]>) -> CoreResult<DisputeIdentity> {
    let salt = custom_salt.unwrap_or_else(random_32);

    let identity_secret = match address {
        Some(addr) => {
            let padded = address_to_20_bytes(addr)?;
            let mut hasher = Keccak256::new();
            hasher.update(padded);
            hasher.update(salt);
            let digest: [u8; 32] = hasher.finalize().into();
            digest
        }
        None => random_32(),
    };

    let identity_hash = compute_identity_hash(&identity_secret);

    Ok(DisputeIdentity {
        identity_secret,
        identity_hash,
        salt,
        address: address.map(|a| a.to_string()),
    })
}

/// Derives an identity deterministically from a wallet signature:
/// `keccak(signature ‖ message)`. Lets a participant recover the same
/// identity secret from the same signature without persisting it anywhere.
pub fn derive_identity_from_signature(signature: &[u8], message: &[u8]) -> DisputeIdentity {
    let mut hasher = Keccak256::new();
    hasher.update(signature);
    hasher.update(message);
    let identity_secret: [u8; 32] = hasher.finalize().into();
    let identity_hash = compute_identity_hash(&identity_secret);

    let mut salt = [0u8; 32];
    let take = signature.len().min(32);
    salt[..take].copy_from_slice(&signature[..take]);

    DisputeIdentity {
        identity_secret,
        identity_hash,
        salt,
        address: None,
    }
}

/// `Poseidon([secret])`, serialized as 32 big-endian bytes -- the identity
/// commitment registered on chain in place of the secret itself.
pub fn compute_identity_hash(secret: &[u8; 32]) -> [u8; 32] {
    let scalar = Fr::from_be_bytes_mod_order(secret);
    Poseidon::hash_to_bytes(&[scalar])
}

fn random_32() -> [u8; 32] {
    let mut buf = [0u8; 32];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Strips an optional `0x` prefix and left-pads/validates to exactly 20
/// bytes, matching the spec's "address_padded_to_20B" input to the
/// address-bound derivation.
fn address_to_20_bytes(address: &str) -> CoreResult<[u8; 20]> {
    let hex_part = address.strip_prefix("0x").unwrap_or(address);
    let bytes = hex::decode(hex_part)
        .map_err(|e| CoreError::InvalidLength(format!("address is not valid hex: {e}")))?;
    if bytes.len() > 20 {
        return Err(CoreError::InvalidLength(
            "address exceeds 20 bytes".into(),
        ));
    }
    let mut out = [0u8; 20];
    let offset = 20 - bytes.len();
    out[offset..].copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_identity_has_matching_hash() {
        let identity = generate_identity(None, None).unwrap();
        assert_eq!(
            identity.identity_hash,
            compute_identity_hash(&identity.identity_secret)
        );
    }

    #[test]
    fn address_bound_identity_is_deterministic_given_same_salt() {
        let salt = [9u8; 32];
        let a = generate_identity(Some("0x00112233445566778899aabbccddeeff00112233"), Some(salt)).unwrap();
        let b = generate_identity(Some("0x00112233445566778899aabbccddeeff00112233"), Some(salt)).unwrap();
        assert_eq!(a.identity_secret, b.identity_secret);
        assert_eq!(a.identity_hash, b.identity_hash);
    }

    #[test]
    fn different_addresses_give_different_secrets() {
        let salt = [1u8; 32];
        let a = generate_identity(Some("0x0000000000000000000000000000000000000a"), Some(salt)).unwrap();
        let b = generate_identity(Some("0x0000000000000000000000000000000000000b"), Some(salt)).unwrap();
        assert_ne!(a.identity_secret, b.identity_secret);
    }

    #[test]
    fn signature_derivation_is_deterministic() {
        let a = derive_identity_from_signature(b"sig-bytes", b"message");
        let b = derive_identity_from_signature(b"sig-bytes", b"message");
        assert_eq!(a.identity_secret, b.identity_secret);
        assert_eq!(a.identity_hash, b.identity_hash);
    }

    #[test]
    fn two_random_identities_differ() {
        let a = generate_identity(None, None).unwrap();
        let b = generate_identity(None, None).unwrap();
        assert_ne!(a.identity_secret, b.identity_secret);
    }
}
