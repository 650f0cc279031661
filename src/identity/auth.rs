//! Challenge-response DID authentication: session and bearer-token
//! lifecycle (spec section 4.7). Grounded on
//! `examples/original_source/src/rra/auth/did_auth.py`
//! (`DIDAuthenticator`, `AuthChallenge`, `AuthSession`).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{CoreError, CoreResult};
use crate::identity::did::DidResolver;

const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(300);
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs()
}

/// A one-time challenge issued to a DID holder. Deleted on verification
/// success or expiration, whichever comes first.
#[derive(Debug, Clone)]
pub struct AuthChallenge {
    pub id: String,
    pub did: String,
    pub nonce: [u8; 32],
    pub message: String,
    pub created_at: u64,
    pub expires_at: u64,
}

impl AuthChallenge {
    /// `"<id>:<nonce_hex>:<message>:<unix_created>"`, the exact bytes the
    /// holder must sign.
    pub fn to_sign_bytes(&self) -> Vec<u8> {
        format!(
            "{}:{}:{}:{}",
            self.id,
            hex::encode(self.nonce),
            self.message,
            self.created_at
        )
        .into_bytes()
    }

    fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// Lifecycle state of an [`AuthSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Pending,
    Verified,
    Failed,
    Expired,
    Revoked,
}

/// A verified (or verifying) session for a DID holder.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub did: String,
    pub challenge_id: String,
    pub created_at: u64,
    pub expires_at: u64,
    pub identity_score: Option<f64>,
    pub scopes: HashSet<String>,
    pub status: AuthStatus,
}

impl AuthSession {
    /// A session is valid iff it was verified and has not yet expired.
    pub fn is_valid(&self, now: u64) -> bool {
        self.status == AuthStatus::Verified && now <= self.expires_at
    }

    /// Wildcard scope `"*"` grants everything; otherwise the scope must be
    /// listed explicitly.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains("*") || self.scopes.contains(scope)
    }
}

/// Outcome of a challenge verification or token validation.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub success: bool,
    pub did: String,
    pub session: Option<AuthSession>,
    pub identity_score: Option<f64>,
}

/// External sybil-resistance collaborator. The core defines the contract
/// and ships no scoring logic of its own.
pub trait IdentityScoreSource: Send + Sync {
    fn get_identity_score(&self, did: &str) -> Option<f64>;
}

struct ChallengeStore {
    challenges: Mutex<HashMap<String, AuthChallenge>>,
}

impl ChallengeStore {
    fn new() -> Self {
        ChallengeStore {
            challenges: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, challenge: AuthChallenge) {
        self.challenges
            .lock()
            .expect("challenge store mutex poisoned")
            .insert(challenge.id.clone(), challenge);
    }

    fn take(&self, id: &str) -> Option<AuthChallenge> {
        self.challenges
            .lock()
            .expect("challenge store mutex poisoned")
            .remove(id)
    }

    fn sweep_expired(&self, now: u64) -> usize {
        let mut challenges = self.challenges.lock().expect("challenge store mutex poisoned");
        let before = challenges.len();
        challenges.retain(|_, c| !c.is_expired(now));
        before - challenges.len()
    }
}

struct SessionStore {
    sessions: Mutex<HashMap<String, AuthSession>>,
    by_did: Mutex<HashMap<String, HashSet<String>>>,
}

impl SessionStore {
    fn new() -> Self {
        SessionStore {
            sessions: Mutex::new(HashMap::new()),
            by_did: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, session: AuthSession) {
        let did = session.did.clone();
        let id = session.id.clone();
        self.sessions
            .lock()
            .expect("session store mutex poisoned")
            .insert(id.clone(), session);
        self.by_did
            .lock()
            .expect("session store mutex poisoned")
            .entry(did)
            .or_default()
            .insert(id);
    }

    fn get(&self, id: &str) -> Option<AuthSession> {
        self.sessions
            .lock()
            .expect("session store mutex poisoned")
            .get(id)
            .cloned()
    }

    fn sweep_expired(&self, now: u64) -> usize {
        let mut sessions = self.sessions.lock().expect("session store mutex poisoned");
        let mut by_did = self.by_did.lock().expect("session store mutex poisoned");
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| now > s.expires_at)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            if let Some(session) = sessions.remove(id) {
                if let Some(ids) = by_did.get_mut(&session.did) {
                    ids.remove(id);
                    if ids.is_empty() {
                        by_did.remove(&session.did);
                    }
                }
            }
        }
        expired.len()
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Drives the challenge-response flow and bearer-token lifecycle against a
/// [`DidResolver`]. `SessionStore`, `ChallengeStore`, and the token secret
/// are owned by this struct rather than process-wide singletons, so a test
/// can construct an isolated authenticator per case.
pub struct DidAuthenticator {
    resolver: DidResolver,
    challenges: ChallengeStore,
    sessions: SessionStore,
    token_secret: TokenSecret,
    challenge_ttl: Duration,
    session_ttl: Duration,
    score_source: Option<Box<dyn IdentityScoreSource>>,
    min_identity_score: Option<f64>,
}

/// Process-lifetime HMAC key for bearer tokens, zeroed on drop.
struct TokenSecret([u8; 32]);

impl Drop for TokenSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Tunable timeouts for a [`DidAuthenticator`]. Defaults match spec
/// section 5's 300s challenge / 3600s session lifetimes.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatorConfig {
    pub challenge_ttl: Duration,
    pub session_ttl: Duration,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        AuthenticatorConfig {
            challenge_ttl: DEFAULT_CHALLENGE_TTL,
            session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

impl DidAuthenticator {
    pub fn new(resolver: DidResolver) -> Self {
        Self::with_config(resolver, AuthenticatorConfig::default())
    }

    pub fn with_config(resolver: DidResolver, config: AuthenticatorConfig) -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        DidAuthenticator {
            resolver,
            challenges: ChallengeStore::new(),
            sessions: SessionStore::new(),
            token_secret: TokenSecret(secret),
            challenge_ttl: config.challenge_ttl,
            session_ttl: config.session_ttl,
            score_source: None,
            min_identity_score: None,
        }
    }

    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Requires an identity score at or above `minimum` for new sessions,
    /// sourced from `source`.
    pub fn with_identity_score_gate(mut self, source: Box<dyn IdentityScoreSource>, minimum: f64) -> Self {
        self.score_source = Some(source);
        self.min_identity_score = Some(minimum);
        self
    }

    /// Issues a fresh challenge for `did`. Fails if the DID cannot be
    /// resolved at all.
    pub async fn create_challenge(&self, did: &str, message: impl Into<String>) -> CoreResult<AuthChallenge> {
        self.resolver.resolve(did).await?;

        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);
        let mut id_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut id_bytes);
        let created_at = now_unix();

        let challenge = AuthChallenge {
            id: hex::encode(id_bytes),
            did: did.to_string(),
            nonce,
            message: message.into(),
            created_at,
            expires_at: created_at + self.challenge_ttl.as_secs(),
        };
        self.challenges.insert(challenge.clone());
        Ok(challenge)
    }

    /// Verifies a signed challenge and, on success, creates a session. The
    /// challenge is consumed (removed) in every terminal outcome.
    pub async fn verify_challenge(
        &self,
        challenge_id: &str,
        signature: &[u8],
        scopes: Option<HashSet<String>>,
    ) -> CoreResult<AuthResult> {
        let challenge = self
            .challenges
            .take(challenge_id)
            .ok_or(CoreError::ChallengeNotFound)?;

        let now = now_unix();
        if challenge.is_expired(now) {
            return Err(CoreError::ChallengeExpired);
        }

        let to_sign = challenge.to_sign_bytes();
        let verified = self
            .resolver
            .verify_signature(&challenge.did, &to_sign, signature)
            .await?;
        if !verified {
            log::warn!("challenge verification failed: signature did not verify for did {}", challenge.did);
            return Err(CoreError::InvalidSignature);
        }

        let identity_score = self
            .score_source
            .as_ref()
            .and_then(|source| source.get_identity_score(&challenge.did));
        if let Some(minimum) = self.min_identity_score {
            let actual = identity_score.unwrap_or(0.0);
            if actual < minimum {
                return Err(CoreError::InsufficientScore {
                    actual,
                    required: minimum,
                });
            }
        }

        let mut session_id_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut session_id_bytes);
        let created_at = now;
        let session = AuthSession {
            id: hex::encode(session_id_bytes),
            did: challenge.did.clone(),
            challenge_id: challenge.id.clone(),
            created_at,
            expires_at: created_at + self.session_ttl.as_secs(),
            identity_score,
            scopes: scopes.unwrap_or_default(),
            status: AuthStatus::Verified,
        };
        self.sessions.insert(session.clone());

        Ok(AuthResult {
            success: true,
            did: challenge.did,
            session: Some(session),
            identity_score,
        })
    }

    /// Mints a bearer token for an existing, valid session.
    pub fn issue_token(&self, session_id: &str) -> CoreResult<String> {
        let session = self.sessions.get(session_id).ok_or(CoreError::SessionNotFound)?;
        if !session.is_valid(now_unix()) {
            return Err(CoreError::SessionInvalid);
        }

        let payload = format!("{}|{}|{}", session.id, session.did, session.expires_at);
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.token_secret.0)
            .expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        let tag = mac.finalize().into_bytes();

        let mut prefix_bytes = [0u8; 8];
        OsRng.fill_bytes(&mut prefix_bytes);
        let prefix = hex::encode(prefix_bytes);
        let encoded_payload = base64_url_encode(payload.as_bytes());
        Ok(format!("{prefix}.{encoded_payload}.{}", hex::encode(tag)))
    }

    /// Validates a bearer token and resolves the session it names.
    pub fn validate_token(&self, token: &str) -> CoreResult<AuthResult> {
        let parts: Vec<&str> = token.split('.').collect();
        let [_prefix, encoded_payload, hex_tag] = parts.as_slice() else {
            return Err(CoreError::InvalidToken);
        };

        let payload = base64_url_decode(encoded_payload).ok_or(CoreError::InvalidToken)?;
        let given_tag = hex::decode(hex_tag).map_err(|_| CoreError::InvalidToken)?;

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.token_secret.0)
            .expect("HMAC accepts any key length");
        mac.update(&payload);
        let expected_tag = mac.finalize().into_bytes();

        if given_tag.len() != expected_tag.len() || given_tag.ct_eq(&expected_tag).unwrap_u8() != 1 {
            log::warn!("token validation failed: MAC mismatch");
            return Err(CoreError::InvalidToken);
        }

        let payload_str = std::str::from_utf8(&payload).map_err(|_| CoreError::InvalidToken)?;
        let fields: Vec<&str> = payload_str.split('|').collect();
        let [session_id, did, expires_at_str] = fields.as_slice() else {
            return Err(CoreError::InvalidToken);
        };
        let expires_at: u64 = expires_at_str.parse().map_err(|_| CoreError::InvalidToken)?;

        if now_unix() > expires_at {
            return Err(CoreError::TokenExpired);
        }

        let session = self
            .sessions
            .get(session_id)
            .ok_or(CoreError::SessionNotFound)?;
        if !session.is_valid(now_unix()) {
            return Err(CoreError::SessionInvalid);
        }
        if session.did != *did {
            return Err(CoreError::InvalidToken);
        }

        Ok(AuthResult {
            success: true,
            did: session.did.clone(),
            identity_score: session.identity_score,
            session: Some(session),
        })
    }

    /// Checks that a session (by id) both is valid and carries `scope`.
    pub fn require_scope(&self, session_id: &str, scope: &str) -> CoreResult<()> {
        let session = self.sessions.get(session_id).ok_or(CoreError::SessionNotFound)?;
        if !session.is_valid(now_unix()) {
            return Err(CoreError::SessionInvalid);
        }
        if !session.has_scope(scope) {
            return Err(CoreError::InsufficientScope(scope.to_string()));
        }
        Ok(())
    }

    /// Evicts expired challenges and sessions. Returns `(challenges_evicted,
    /// sessions_evicted)`.
    pub fn sweep_expired(&self) -> (usize, usize) {
        let now = now_unix();
        (
            self.challenges.sweep_expired(now),
            self.sessions.sweep_expired(now),
        )
    }
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

fn base64_url_decode(data: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::did::DidResolver;
    use ed25519_dalek::Signer;

    fn ed25519_did_and_signer() -> (String, ed25519_dalek::SigningKey) {
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&[7u8; 32]);
        let verifying_key = signing_key.verifying_key();
        let mut key_bytes = vec![0xed, 0x01];
        key_bytes.extend_from_slice(verifying_key.as_bytes());
        let encoded = base58_encode(&key_bytes);
        (format!("did:key:z{encoded}"), signing_key)
    }

    fn base58_encode(input: &[u8]) -> String {
        const ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
        let mut digits: Vec<u8> = vec![0];
        for &byte in input {
            let mut carry = byte as u32;
            for digit in digits.iter_mut() {
                carry += (*digit as u32) << 8;
                *digit = (carry % 58) as u8;
                carry /= 58;
            }
            while carry > 0 {
                digits.push((carry % 58) as u8);
                carry /= 58;
            }
        }
        let leading_zeros = input.iter().take_while(|&&b| b == 0).count();
        let mut out = String::new();
        for _ in 0..leading_zeros {
            out.push('1');
        }
        for &d in digits.iter().rev() {
            out.push(ALPHABET[d as usize] as char);
        }
        out
    }

    #[tokio::test]
    async fn full_challenge_response_round_trip_issues_valid_token() {
        let (did, signing_key) = ed25519_did_and_signer();
        let auth = DidAuthenticator::new(DidResolver::new());

        let challenge = auth.create_challenge(&did, "login").await.unwrap();
        let signature = signing_key.sign(&challenge.to_sign_bytes());
        let result = auth
            .verify_challenge(&challenge.id, &signature.to_bytes(), None)
            .await
            .unwrap();
        assert!(result.success);
        let session = result.session.unwrap();

        let token = auth.issue_token(&session.id).unwrap();
        let validated = auth.validate_token(&token).unwrap();
        assert!(validated.success);
        assert_eq!(validated.did, did);
    }

    #[tokio::test]
    async fn replaying_a_challenge_id_fails_with_not_found() {
        let (did, signing_key) = ed25519_did_and_signer();
        let auth = DidAuthenticator::new(DidResolver::new());

        let challenge = auth.create_challenge(&did, "login").await.unwrap();
        let signature = signing_key.sign(&challenge.to_sign_bytes());
        auth.verify_challenge(&challenge.id, &signature.to_bytes(), None)
            .await
            .unwrap();

        let replay = auth
            .verify_challenge(&challenge.id, &signature.to_bytes(), None)
            .await;
        assert!(matches!(replay, Err(CoreError::ChallengeNotFound)));
    }

    #[tokio::test]
    async fn expired_challenge_is_rejected_and_removed() {
        let (did, signing_key) = ed25519_did_and_signer();
        let auth = DidAuthenticator::new(DidResolver::new()).with_challenge_ttl(Duration::from_secs(0));

        let challenge = auth.create_challenge(&did, "login").await.unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        let signature = signing_key.sign(&challenge.to_sign_bytes());
        let result = auth.verify_challenge(&challenge.id, &signature.to_bytes(), None).await;
        assert!(matches!(result, Err(CoreError::ChallengeExpired)));

        let replay = auth.verify_challenge(&challenge.id, &signature.to_bytes(), None).await;
        assert!(matches!(replay, Err(CoreError::ChallengeNotFound)));
    }

    #[tokio::test]
    async fn wrong_signature_is_rejected() {
        let (did, _signing_key) = ed25519_did_and_signer();
        let other_key = ed25519_dalek::SigningKey::from_bytes(&[9u8; 32]);
        let auth = DidAuthenticator::new(DidResolver::new());

        let challenge = auth.create_challenge(&did, "login").await.unwrap();
        let bad_signature = other_key.sign(&challenge.to_sign_bytes());
        let result = auth
            .verify_challenge(&challenge.id, &bad_signature.to_bytes(), None)
            .await;
        assert!(matches!(result, Err(CoreError::InvalidSignature)));
    }

    #[tokio::test]
    async fn token_with_flipped_hmac_byte_is_rejected() {
        let (did, signing_key) = ed25519_did_and_signer();
        let auth = DidAuthenticator::new(DidResolver::new());

        let challenge = auth.create_challenge(&did, "login").await.unwrap();
        let signature = signing_key.sign(&challenge.to_sign_bytes());
        let result = auth
            .verify_challenge(&challenge.id, &signature.to_bytes(), None)
            .await
            .unwrap();
        let token = auth.issue_token(&result.session.unwrap().id).unwrap();

        let mut corrupted = token.into_bytes();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0x01;
        let corrupted = String::from_utf8(corrupted).unwrap();
        assert!(matches!(
            auth.validate_token(&corrupted),
            Err(CoreError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn scope_check_honors_wildcard_and_explicit_scopes() {
        let (did, signing_key) = ed25519_did_and_signer();
        let auth = DidAuthenticator::new(DidResolver::new());

        let challenge = auth.create_challenge(&did, "login").await.unwrap();
        let signature = signing_key.sign(&challenge.to_sign_bytes());
        let mut scopes = HashSet::new();
        scopes.insert("read".to_string());
        let result = auth
            .verify_challenge(&challenge.id, &signature.to_bytes(), Some(scopes))
            .await
            .unwrap();
        let session_id = result.session.unwrap().id;

        assert!(auth.require_scope(&session_id, "read").is_ok());
        assert!(matches!(
            auth.require_scope(&session_id, "write"),
            Err(CoreError::InsufficientScope(_))
        ));
    }

    #[tokio::test]
    async fn sweep_evicts_expired_challenges() {
        let (did, _signing_key) = ed25519_did_and_signer();
        let auth = DidAuthenticator::new(DidResolver::new()).with_challenge_ttl(Duration::from_secs(0));
        auth.create_challenge(&did, "login").await.unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        let (challenges_evicted, sessions_evicted) = auth.sweep_expired();
        assert_eq!(challenges_evicted, 1);
        assert_eq!(sessions_evicted, 0);
    }

    #[tokio::test]
    async fn identity_score_gate_rejects_below_threshold() {
        struct FixedScore(f64);
        impl IdentityScoreSource for FixedScore {
            fn get_identity_score(&self, _did: &str) -> Option<f64> {
                Some(self.0)
            }
        }

        let (did, signing_key) = ed25519_did_and_signer();
        let auth = DidAuthenticator::new(DidResolver::new())
            .with_identity_score_gate(Box::new(FixedScore(10.0)), 50.0);

        let challenge = auth.create_challenge(&did, "login").await.unwrap();
        let signature = signing_key.sign(&challenge.to_sign_bytes());
        let result = auth.verify_challenge(&challenge.id, &signature.to_bytes(), None).await;
        assert!(matches!(result, Err(CoreError::InsufficientScore { .. })));
    }
}
