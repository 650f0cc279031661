//! Cryptographic and identity core for the rights/licensing dispute
//! platform: BN254 curve arithmetic, domain-separated hashing, a
//! Poseidon-style sponge, Pedersen commitments, ECIES viewing keys,
//! Shamir threshold secret sharing, and DID-based identity
//! authentication.

pub mod bn254;
pub mod commitments;
pub mod error;
pub mod hashing;
pub mod identity;
pub mod poseidon;
pub mod shamir;
pub mod viewing_keys;

pub use bn254::G1Point;
pub use commitments::{
    aggregate, commit, commit_evidence, commit_random, commitments_equal, verify,
    verify_evidence_commitment, CommitmentProof, EvidenceCommitmentManager, Opening,
};
pub use error::{CoreError, CoreResult};
pub use hashing::{dispute_domain, dispute_item_domain, domain_hash, evidence_hash, hash_to_scalar};
pub use identity::{
    compute_identity_hash, derive_identity_from_signature, generate_identity,
    AuthChallenge, AuthResult, AuthSession, AuthStatus, AuthenticatorConfig, DidAuthenticator,
    DidDocument, DidMethod, DidResolver, DidResolverConfig, DisputeIdentity, IdentityScoreSource,
};
pub use poseidon::Poseidon;
pub use shamir::{reconstruct, split, verify_share, EscrowManager, KeyShare, ThresholdConfig};
pub use viewing_keys::{
    decrypt, decrypt_with_viewing_key, derive_viewing_key, encrypt, encrypt_with_viewing_key,
    export_encrypted, export_encrypted_with_config, import_encrypted,
    import_encrypted_with_config, EncryptedData, ExportConfig, ViewingKey, ViewingKeyPurpose,
};
