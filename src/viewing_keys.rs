//! secp256k1 ECIES viewing-key engine (C5).
//!
//! Distinct curve from the BN254 used by the commitment engine: viewing
//! keys are secp256k1 keypairs, encryption is ECDH + HKDF-SHA256 +
//! AES-256-GCM, and nonces come from a process-wide counter rather than
//! pure randomness so that many encryptions under the same derived key
//! never collide on a birthday bound.

use aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use k256::ecdh::diffie_hellman;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use pbkdf2::pbkdf2_hmac;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{CoreError, CoreResult};
use crate::hashing::DOMAIN_VIEWING_KEY_ENCRYPTION_V2;

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs()
}

/// The purpose a viewing key was issued for. Distinct purposes never share
/// a derivation path (the purpose string is mixed into HKDF `info`), so a
/// key escrowed for `DisputeEvidence` cannot be silently reused to decrypt
/// `ComplianceReport` records even if the same context id and index were
/// (mis)used for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewingKeyPurpose {
    DisputeEvidence,
    LicenseMetadata,
    AuditTrail,
    ComplianceReport,
}

impl ViewingKeyPurpose {
    fn as_str(&self) -> &'static str {
        match self {
            ViewingKeyPurpose::DisputeEvidence => "dispute_evidence",
            ViewingKeyPurpose::LicenseMetadata => "license_metadata",
            ViewingKeyPurpose::AuditTrail => "audit_trail",
            ViewingKeyPurpose::ComplianceReport => "compliance_report",
        }
    }
}

impl fmt::Display for ViewingKeyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-dispute (or per-context) viewing key: a secp256k1 keypair bound to
/// a purpose, a context id, and an optional expiration. Only the public
/// half and the metadata are ever meant to be handed around loosely; the
/// private half is the thing C6 escrows.
pub struct ViewingKey {
    pub secret: SecretKey,
    pub public: PublicKey,
    pub purpose: ViewingKeyPurpose,
    pub context_id: String,
    pub created_at: u64,
    pub expires_at: Option<u64>,
    pub metadata: HashMap<String, String>,
}

impl ViewingKey {
    /// Generates a fresh random viewing key for `purpose`/`context_id`.
    pub fn generate(
        purpose: ViewingKeyPurpose,
        context_id: &str,
        expires_at: Option<u64>,
        metadata: HashMap<String, String>,
    ) -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        ViewingKey {
            secret,
            public,
            purpose,
            context_id: context_id.to_string(),
            created_at: now_unix(),
            expires_at,
            metadata,
        }
    }

    /// Derives a viewing key from a master secret via
    /// [`derive_viewing_key`], rather than sampling fresh randomness.
    pub fn derive(
        master_secret: &[u8],
        purpose: ViewingKeyPurpose,
        context_id: &str,
        index: u64,
        expires_at: Option<u64>,
        metadata: HashMap<String, String>,
    ) -> CoreResult<Self> {
        let secret = derive_viewing_key(master_secret, purpose.as_str(), context_id, index)?;
        let public = secret.public_key();
        Ok(ViewingKey {
            secret,
            public,
            purpose,
            context_id: context_id.to_string(),
            created_at: now_unix(),
            expires_at,
            metadata,
        })
    }

    /// `keccak(public)`, over the 65-byte uncompressed SEC1 encoding (the
    /// data model's "Commitment is `keccak(public)`" from spec section 3).
    pub fn commitment(&self) -> [u8; 32] {
        Keccak256::digest(self.public.to_encoded_point(false).as_bytes()).into()
    }

    /// True iff `expires_at` is set and in the past.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expiry) => now_unix() > expiry,
            None => false,
        }
    }
}

/// Encrypts through a [`ViewingKey`], refusing expired keys for new
/// encryption per spec section 4.5 ("the manager does" enforce
/// expiration -- the raw `encrypt` engine call does not).
pub fn encrypt_with_viewing_key(key: &ViewingKey, plaintext: &[u8]) -> CoreResult<EncryptedData> {
    if key.is_expired() {
        return Err(CoreError::InvalidKey(format!(
            "viewing key for context {} expired at {}",
            key.context_id,
            key.expires_at.unwrap_or_default()
        )));
    }
    encrypt(&key.public, plaintext)
}

/// Decrypts through a [`ViewingKey`], refusing expired keys for new
/// decryption per spec section 4.5.
pub fn decrypt_with_viewing_key(key: &ViewingKey, data: &EncryptedData) -> CoreResult<Vec<u8>> {
    if key.is_expired() {
        return Err(CoreError::InvalidKey(format!(
            "viewing key for context {} expired at {}",
            key.context_id,
            key.expires_at.unwrap_or_default()
        )));
    }
    decrypt(&key.secret, data)
}

const PBKDF2_MIN_ITERATIONS: u32 = 600_000;

/// Tunable parameters for at-rest viewing-key export. Default matches
/// spec section 4.5's minimum PBKDF2 iteration count.
#[derive(Debug, Clone, Copy)]
pub struct ExportConfig {
    pub pbkdf2_iterations: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            pbkdf2_iterations: PBKDF2_MIN_ITERATIONS,
        }
    }
}

/// Process-wide IV counter: `iv = random(8) ‖ counter(4B big-endian)`.
/// Wraps at `u32::MAX` back to 0 (the spec treats wraparound as acceptable
/// since the random 8-byte prefix still differs across wraps in practice
/// over any realistic process lifetime).
static IV_COUNTER: AtomicU32 = AtomicU32::new(0);

fn next_iv() -> [u8; 12] {
    let mut iv = [0u8; 12];
    OsRng.fill_bytes(&mut iv[0..8]);
    let counter = IV_COUNTER.fetch_add(1, Ordering::SeqCst);
    iv[8..12].copy_from_slice(&counter.to_be_bytes());
    iv
}

/// An ECIES-encrypted record produced by [`encrypt`].
#[derive(Debug, Clone)]
pub struct EncryptedData {
    /// Ephemeral public key, 64-byte `x‖y` (uncompressed SEC1 with the
    /// leading `0x04` stripped).
    pub ephemeral_public: [u8; 64],
    pub iv: [u8; 12],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; 16],
    /// `keccak(recipient public key)`, checked on decrypt before any curve
    /// parsing is attempted.
    pub key_commitment: [u8; 32],
}

/// Encrypts `plaintext` to `recipient_public`, generating a fresh ephemeral
/// keypair.
pub fn encrypt(recipient_public: &PublicKey, plaintext: &[u8]) -> CoreResult<EncryptedData> {
    let ephemeral_secret = SecretKey::random(&mut OsRng);
    let ephemeral_public = ephemeral_secret.public_key();
    let ephemeral_bytes = public_key_to_64(&ephemeral_public);

    let shared_secret = diffie_hellman(
        &ephemeral_secret.to_nonzero_scalar(),
        recipient_public.as_affine(),
    );
    let aes_key = derive_aes_key(shared_secret.raw_secret_bytes().as_slice(), &ephemeral_bytes)?;

    let iv = next_iv();
    let cipher = Aes256Gcm::new_from_slice(&aes_key)
        .map_err(|_| CoreError::DecryptionFailed)?;
    let combined = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| CoreError::DecryptionFailed)?;
    let (ciphertext, tag_slice) = combined.split_at(combined.len() - 16);
    let mut tag = [0u8; 16];
    tag.copy_from_slice(tag_slice);

    let key_commitment: [u8; 32] =
        Keccak256::digest(recipient_public.to_encoded_point(false).as_bytes()).into();

    Ok(EncryptedData {
        ephemeral_public: ephemeral_bytes,
        iv,
        ciphertext: ciphertext.to_vec(),
        tag,
        key_commitment,
    })
}

/// Decrypts a record with recipient private key `recipient_secret`.
pub fn decrypt(recipient_secret: &SecretKey, data: &EncryptedData) -> CoreResult<Vec<u8>> {
    let recipient_public = recipient_secret.public_key();
    let expected_commitment: [u8; 32] =
        Keccak256::digest(recipient_public.to_encoded_point(false).as_bytes()).into();
    if !bool::from(expected_commitment.ct_eq(&data.key_commitment)) {
        log::warn!("viewing key decryption failed: key commitment mismatch");
        return Err(CoreError::KeyMismatch);
    }

    if data.ephemeral_public.iter().all(|b| *b == 0) {
        return Err(CoreError::InvalidPoint(
            "ephemeral public key is the point at infinity".into(),
        ));
    }
    let ephemeral_public = public_key_from_64(&data.ephemeral_public)?;

    let shared_secret = diffie_hellman(
        &recipient_secret.to_nonzero_scalar(),
        ephemeral_public.as_affine(),
    );
    let aes_key = derive_aes_key(shared_secret.raw_secret_bytes().as_slice(), &data.ephemeral_public)?;

    let cipher = Aes256Gcm::new_from_slice(&aes_key)
        .map_err(|_| CoreError::DecryptionFailed)?;
    let mut combined = data.ciphertext.clone();
    combined.extend_from_slice(&data.tag);
    cipher
        .decrypt(Nonce::from_slice(&data.iv), combined.as_ref())
        .map_err(|_| CoreError::DecryptionFailed)
}

fn derive_aes_key(shared_secret: &[u8], ephemeral_public_64: &[u8; 64]) -> CoreResult<[u8; 32]> {
    let salt = &ephemeral_public_64[0..16];
    let hk = Hkdf::<Sha256>::new(Some(salt), shared_secret);
    let mut okm = [0u8; 32];
    hk.expand(DOMAIN_VIEWING_KEY_ENCRYPTION_V2, &mut okm)
        .map_err(|_| CoreError::DecryptionFailed)?;
    Ok(okm)
}

fn public_key_to_64(key: &PublicKey) -> [u8; 64] {
    let encoded = key.to_encoded_point(false);
    let bytes = encoded.as_bytes();
    let mut out = [0u8; 64];
    out.copy_from_slice(&bytes[1..65]);
    out
}

fn public_key_from_64(bytes: &[u8; 64]) -> CoreResult<PublicKey> {
    let mut uncompressed = [0u8; 65];
    uncompressed[0] = 0x04;
    uncompressed[1..].copy_from_slice(bytes);
    PublicKey::from_sec1_bytes(&uncompressed)
        .map_err(|_| CoreError::InvalidPoint("ephemeral public key is not on secp256k1".into()))
}

/// Hierarchical viewing-key derivation: `HKDF-SHA256(ikm = master_secret,
/// salt = "rra-viewing-key-v1", info = "<purpose>:<context>:<index>")`,
/// reduced to a secp256k1 scalar. Resamples (by incrementing a counter
/// appended to `info`) on the vanishingly rare case the 32 bytes exceed the
/// curve order or are zero.
pub fn derive_viewing_key(
    master_secret: &[u8],
    purpose: &str,
    context: &str,
    index: u64,
) -> CoreResult<SecretKey> {
    use crate::hashing::DOMAIN_VIEWING_KEY_DERIVATION_V1;
    for attempt in 0u32..16 {
        let info = if attempt == 0 {
            format!("{purpose}:{context}:{index}")
        } else {
            format!("{purpose}:{context}:{index}:retry{attempt}")
        };
        let hk = Hkdf::<Sha256>::new(Some(DOMAIN_VIEWING_KEY_DERIVATION_V1), master_secret);
        let mut okm = [0u8; 32];
        hk.expand(info.as_bytes(), &mut okm)
            .map_err(|_| CoreError::DecryptionFailed)?;
        if let Ok(key) = SecretKey::from_be_bytes(&okm) {
            return Ok(key);
        }
    }
    Err(CoreError::DecryptionFailed)
}

/// At-rest export: `salt(16) ‖ nonce(12) ‖ ciphertext ‖ tag(16)`, protected
/// by PBKDF2-HMAC-SHA256 (>= 600,000 iterations by default) and
/// AES-256-GCM. The iteration count is not carried in the blob -- it is a
/// fixed parameter both sides agree on out of band, per the at-rest key
/// protection layout.
pub fn export_encrypted(secret_key: &SecretKey, password: &[u8]) -> CoreResult<Vec<u8>> {
    export_encrypted_with_config(secret_key, password, ExportConfig::default())
}

/// Same as [`export_encrypted`], with the PBKDF2 iteration count taken
/// from `config` instead of the built-in minimum. The iteration count
/// still isn't written into the blob; callers who export and import with
/// a non-default count must agree on it themselves (see
/// [`import_encrypted_with_config`]).
pub fn export_encrypted_with_config(
    secret_key: &SecretKey,
    password: &[u8],
    config: ExportConfig,
) -> CoreResult<Vec<u8>> {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(password, &salt, config.pbkdf2_iterations, &mut key[..]);

    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| CoreError::DecryptionFailed)?;
    let plaintext = secret_key.to_be_bytes();
    let combined = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
        .map_err(|_| CoreError::DecryptionFailed)?;

    let mut blob = Vec::with_capacity(16 + 12 + combined.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&combined);
    Ok(blob)
}

/// Reverses [`export_encrypted`] at the built-in minimum iteration count.
/// A wrong password always surfaces as `InvalidPassword`, never a more
/// specific AEAD failure reason.
pub fn import_encrypted(blob: &[u8], password: &[u8]) -> CoreResult<SecretKey> {
    import_encrypted_with_config(blob, password, ExportConfig::default())
}

/// Same as [`import_encrypted`], with the PBKDF2 iteration count taken
/// from `config` instead of the built-in minimum -- must match whatever
/// count [`export_encrypted_with_config`] was called with.
pub fn import_encrypted_with_config(
    blob: &[u8],
    password: &[u8],
    config: ExportConfig,
) -> CoreResult<SecretKey> {
    if blob.len() < 16 + 12 + 16 {
        return Err(CoreError::InvalidLength("export blob too short".into()));
    }
    let salt = &blob[0..16];
    let nonce = &blob[16..28];
    let ciphertext = &blob[28..];

    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(password, salt, config.pbkdf2_iterations, &mut key[..]);

    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| CoreError::InvalidPassword)?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CoreError::InvalidPassword)?,
    );
    SecretKey::from_be_bytes(plaintext.as_slice()).map_err(|_| CoreError::InvalidPassword)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let recipient = SecretKey::random(&mut OsRng);
        let plaintext = b"viewing key test payload";
        let encrypted = encrypt(&recipient.public_key(), plaintext).unwrap();
        let decrypted = decrypt(&recipient, &encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn decrypt_rejects_wrong_recipient() {
        let recipient = SecretKey::random(&mut OsRng);
        let attacker = SecretKey::random(&mut OsRng);
        let encrypted = encrypt(&recipient.public_key(), b"secret").unwrap();
        assert!(decrypt(&attacker, &encrypted).is_err());
    }

    #[test]
    fn decrypt_rejects_infinity_ephemeral_point() {
        let recipient = SecretKey::random(&mut OsRng);
        let mut encrypted = encrypt(&recipient.public_key(), b"secret").unwrap();
        encrypted.ephemeral_public = [0u8; 64];
        assert!(matches!(
            decrypt(&recipient, &encrypted),
            Err(CoreError::InvalidPoint(_))
        ));
    }

    #[test]
    fn distinct_encryptions_use_distinct_ivs() {
        let recipient = SecretKey::random(&mut OsRng);
        let a = encrypt(&recipient.public_key(), b"msg").unwrap();
        let b = encrypt(&recipient.public_key(), b"msg").unwrap();
        assert_ne!(a.iv, b.iv);
    }

    #[test]
    fn hierarchical_derivation_is_deterministic() {
        let master = [7u8; 32];
        let a = derive_viewing_key(&master, "evidence", "dispute-1", 0).unwrap();
        let b = derive_viewing_key(&master, "evidence", "dispute-1", 0).unwrap();
        assert_eq!(a.to_be_bytes(), b.to_be_bytes());
    }

    #[test]
    fn hierarchical_derivation_differs_by_index() {
        let master = [7u8; 32];
        let a = derive_viewing_key(&master, "evidence", "dispute-1", 0).unwrap();
        let b = derive_viewing_key(&master, "evidence", "dispute-1", 1).unwrap();
        assert_ne!(a.to_be_bytes(), b.to_be_bytes());
    }

    #[test]
    fn export_import_round_trip() {
        let key = SecretKey::random(&mut OsRng);
        let config = ExportConfig { pbkdf2_iterations: 1_000 };
        let blob = export_encrypted_with_config(&key, b"password", config).unwrap();
        let recovered = import_encrypted_with_config(&blob, b"password", config).unwrap();
        assert_eq!(key.to_be_bytes(), recovered.to_be_bytes());
    }

    #[test]
    fn import_rejects_wrong_password() {
        let key = SecretKey::random(&mut OsRng);
        let config = ExportConfig { pbkdf2_iterations: 1_000 };
        let blob = export_encrypted_with_config(&key, b"password", config).unwrap();
        assert!(matches!(
            import_encrypted_with_config(&blob, b"wrong-password", config),
            Err(CoreError::InvalidPassword)
        ));
    }

    #[test]
    fn export_blob_matches_the_documented_layout() {
        let key = SecretKey::random(&mut OsRng);
        let config = ExportConfig { pbkdf2_iterations: 1_000 };
        let blob = export_encrypted_with_config(&key, b"password", config).unwrap();
        // salt(16) || nonce(12) || ciphertext || tag(16), no version or
        // iteration-count prefix.
        assert_eq!(blob.len(), 16 + 12 + 32 + 16);
    }

    #[test]
    fn viewing_key_commitment_is_keccak_of_public() {
        let key = ViewingKey::generate(ViewingKeyPurpose::DisputeEvidence, "D-42", None, HashMap::new());
        let expected: [u8; 32] =
            Keccak256::digest(key.public.to_encoded_point(false).as_bytes()).into();
        assert_eq!(key.commitment(), expected);
    }

    #[test]
    fn viewing_key_round_trip_through_manager_helpers() {
        let key = ViewingKey::generate(ViewingKeyPurpose::AuditTrail, "D-1", None, HashMap::new());
        let encrypted = encrypt_with_viewing_key(&key, b"transcript").unwrap();
        let decrypted = decrypt_with_viewing_key(&key, &encrypted).unwrap();
        assert_eq!(decrypted, b"transcript");
    }

    #[test]
    fn expired_viewing_key_is_refused_for_encryption_and_decryption() {
        let key = ViewingKey::generate(
            ViewingKeyPurpose::AuditTrail,
            "D-1",
            Some(now_unix() - 1),
            HashMap::new(),
        );
        assert!(key.is_expired());
        assert!(matches!(
            encrypt_with_viewing_key(&key, b"x"),
            Err(CoreError::InvalidKey(_))
        ));
        let fresh = ViewingKey::generate(ViewingKeyPurpose::AuditTrail, "D-1", None, HashMap::new());
        let encrypted = encrypt(&fresh.public, b"x").unwrap();
        assert!(matches!(
            decrypt_with_viewing_key(&key, &encrypted),
            Err(CoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn derive_viewing_key_struct_matches_raw_derivation() {
        let master = [9u8; 32];
        let key = ViewingKey::derive(
            &master,
            ViewingKeyPurpose::ComplianceReport,
            "D-9",
            3,
            None,
            HashMap::new(),
        )
        .unwrap();
        let raw = derive_viewing_key(&master, "compliance_report", "D-9", 3).unwrap();
        assert_eq!(key.secret.to_be_bytes(), raw.to_be_bytes());
    }

    #[test]
    fn viewing_key_pair_decrypts_but_a_second_key_gets_key_mismatch() {
        let key = ViewingKey::generate(ViewingKeyPurpose::DisputeEvidence, "D-42", None, HashMap::new());
        let encrypted = encrypt_with_viewing_key(&key, b"transcript").unwrap();
        assert_eq!(decrypt_with_viewing_key(&key, &encrypted).unwrap(), b"transcript");

        let other = ViewingKey::generate(ViewingKeyPurpose::DisputeEvidence, "D-42", None, HashMap::new());
        assert!(matches!(
            decrypt_with_viewing_key(&other, &encrypted),
            Err(CoreError::KeyMismatch)
        ));
    }
}
