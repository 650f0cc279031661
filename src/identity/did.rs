//! DID resolution and signature verification (spec section 4.7).
//!
//! Four closed DID methods (`did:ethr`, `did:web`, `did:key`, `did:nlc`),
//! one resolver per method, dispatched by a universal [`DidResolver`] that
//! tries each in turn and caches successful resolutions for 300 seconds.
//! Grounded on `examples/original_source/src/rra/identity/did_resolver.py`
//! (`EthrDIDResolver`, `WebDIDResolver`, `KeyDIDResolver`, `NLCDIDResolver`,
//! `DIDResolver`).

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};
use serde::Deserialize;
use sha3::{Digest, Keccak256};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use crate::error::{CoreError, CoreResult};

const CACHE_TTL: Duration = Duration::from_secs(300);
const CACHE_CAPACITY: usize = 4096;
const WEB_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);
const WEB_RESOLVE_MAX_RETRIES: u32 = 3;

/// Tunable parameters for a [`DidResolver`]. Defaults match spec section
/// 4.7/5: 300s document cache TTL, 10s `did:web` fetch timeout, 3 retries.
#[derive(Debug, Clone, Copy)]
pub struct DidResolverConfig {
    pub cache_ttl: Duration,
    pub web_timeout: Duration,
    pub web_max_retries: u32,
}

impl Default for DidResolverConfig {
    fn default() -> Self {
        DidResolverConfig {
            cache_ttl: CACHE_TTL,
            web_timeout: WEB_RESOLVE_TIMEOUT,
            web_max_retries: WEB_RESOLVE_MAX_RETRIES,
        }
    }
}

/// The four DID methods this crate resolves natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DidMethod {
    Ethr,
    Web,
    Key,
    Nlc,
}

/// A public key or other verification material listed in a DID document.
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: String,
    #[serde(rename = "publicKeyHex", default)]
    pub public_key_hex: Option<String>,
    #[serde(rename = "publicKeyMultibase", default)]
    pub public_key_multibase: Option<String>,
    #[serde(rename = "blockchainAccountId", default)]
    pub blockchain_account_id: Option<String>,
}

/// A service endpoint listed in a DID document.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEndpoint {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

/// A resolved DID document. Read-only input to the rest of the core; the
/// resolver that produced it is the only thing that knows how to refresh
/// it.
#[derive(Debug, Clone, Deserialize)]
pub struct DidDocument {
    pub id: String,
    #[serde(default)]
    pub controller: Option<String>,
    #[serde(rename = "verificationMethod", default)]
    pub verification_method: Vec<VerificationMethod>,
    #[serde(default)]
    pub authentication: Vec<String>,
    #[serde(default)]
    pub service: Vec<ServiceEndpoint>,
    #[serde(default)]
    pub deactivated: bool,
}

impl DidDocument {
    pub fn get_verification_method(&self, method_id: &str) -> Option<&VerificationMethod> {
        self.verification_method
            .iter()
            .find(|vm| vm.id == method_id || vm.id.ends_with(&format!("#{method_id}")))
    }

    /// The first authentication-listed verification method, or the first
    /// verification method if no authentication relationship is declared.
    pub fn primary_verification_method(&self) -> Option<&VerificationMethod> {
        if let Some(first_auth) = self.authentication.first() {
            if let Some(vm) = self.get_verification_method(first_auth) {
                return Some(vm);
            }
        }
        self.verification_method.first()
    }
}

/// Per-method resolver. Custom methods plug in by implementing this trait
/// and registering via [`DidResolver::add_resolver`] rather than extending
/// the closed [`DidMethod`] sum type.
#[async_trait]
pub trait DidMethodResolver: Send + Sync {
    fn supports(&self, did: &str) -> bool;
    async fn resolve(&self, did: &str) -> CoreResult<DidDocument>;
}

/// `did:ethr[:network]:<address>` -- verification is EIP-191 ECDSA
/// recovery against the embedded address, so the document is built
/// entirely offline from the DID string itself.
pub struct EthrResolver;

impl EthrResolver {
    fn network_chain_id(network: Option<&str>) -> u64 {
        match network {
            Some("mainnet") | None => 1,
            Some("sepolia") => 11155111,
            Some("goerli") => 5,
            Some("polygon") => 137,
            Some("arbitrum") => 42161,
            Some("optimism") => 10,
            Some("base") => 8453,
            Some(_) => 1,
        }
    }
}

#[async_trait]
impl DidMethodResolver for EthrResolver {
    fn supports(&self, did: &str) -> bool {
        did.starts_with("did:ethr:")
    }

    async fn resolve(&self, did: &str) -> CoreResult<DidDocument> {
        let rest = did.strip_prefix("did:ethr:").ok_or_else(|| {
            CoreError::DidMalformed("not a did:ethr DID".into())
        })?;
        let parts: Vec<&str> = rest.split(':').collect();
        let (network, address) = match parts.as_slice() {
            [address] => (None, *address),
            [network, address] => (Some(*network), *address),
            _ => {
                return Err(CoreError::DidMalformed(format!(
                    "malformed did:ethr identifier: {rest}"
                )))
            }
        };
        if !is_hex_address(address) {
            return Err(CoreError::DidMalformed(format!(
                "did:ethr address is not valid hex: {address}"
            )));
        }
        let chain_id = Self::network_chain_id(network);
        let vm = VerificationMethod {
            id: format!("{did}#controller"),
            method_type: "EcdsaSecp256k1RecoveryMethod2020".to_string(),
            controller: did.to_string(),
            public_key_hex: None,
            public_key_multibase: None,
            blockchain_account_id: Some(format!("eip155:{chain_id}:{address}")),
        };
        Ok(DidDocument {
            id: did.to_string(),
            controller: None,
            verification_method: vec![vm],
            authentication: vec![format!("{did}#controller")],
            service: Vec::new(),
            deactivated: false,
        })
    }
}

fn is_hex_address(s: &str) -> bool {
    let hex_part = s.strip_prefix("0x").unwrap_or(s);
    hex_part.len() == 40 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// `did:web:<domain>[:path]` -- fetched from `https://<domain>/.well-known/did.json`
/// (root) or `https://<domain>/<path>/did.json`, with bounded retries and a
/// per-request timeout; this is the only method that performs network I/O.
pub struct WebResolver {
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
}

impl WebResolver {
    pub fn new() -> Self {
        Self::with_config(WEB_RESOLVE_TIMEOUT, WEB_RESOLVE_MAX_RETRIES)
    }

    pub fn with_config(timeout: Duration, max_retries: u32) -> Self {
        WebResolver {
            client: reqwest::Client::new(),
            timeout,
            max_retries,
        }
    }

    fn did_to_url(did: &str) -> CoreResult<String> {
        let domain_path = did
            .strip_prefix("did:web:")
            .ok_or_else(|| CoreError::DidMalformed("not a did:web DID".into()))?;
        let decoded = domain_path.replace("%3A", ":");
        let mut parts = decoded.split(':');
        let domain = parts
            .next()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| CoreError::DidMalformed("did:web missing domain".into()))?;
        let rest: Vec<&str> = parts.collect();
        if rest.is_empty() {
            Ok(format!("https://{domain}/.well-known/did.json"))
        } else {
            Ok(format!("https://{domain}/{}/did.json", rest.join("/")))
        }
    }
}

impl Default for WebResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DidMethodResolver for WebResolver {
    fn supports(&self, did: &str) -> bool {
        did.starts_with("did:web:")
    }

    async fn resolve(&self, did: &str) -> CoreResult<DidDocument> {
        let url = Self::did_to_url(did)?;
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let request = self.client.get(&url).timeout(self.timeout).send();
            match request.await {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(CoreError::DidResolutionError(format!(
                            "did:web fetch returned status {}",
                            response.status()
                        )));
                    }
                    let doc: DidDocument = response.json().await.map_err(|e| {
                        CoreError::DidResolutionError(format!("did:web document parse error: {e}"))
                    })?;
                    if doc.id != did {
                        return Err(CoreError::DidResolutionError(
                            "did:web document id does not match requested DID".into(),
                        ));
                    }
                    return Ok(doc);
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        let backoff = Duration::from_millis(250 * 2u64.pow(attempt));
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
        let err = last_error.expect("loop always sets last_error before exhausting retries");
        if err.is_timeout() {
            Err(CoreError::NetworkTimeout)
        } else {
            Err(CoreError::NetworkError(err.to_string()))
        }
    }
}

/// `did:key:<multibase>` -- entirely self-describing; the multicodec
/// prefix on the decoded key bytes picks the key type.
pub struct KeyResolver;

const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];
const SECP256K1_MULTICODEC: [u8; 2] = [0xe7, 0x01];

#[async_trait]
impl DidMethodResolver for KeyResolver {
    fn supports(&self, did: &str) -> bool {
        did.starts_with("did:key:")
    }

    async fn resolve(&self, did: &str) -> CoreResult<DidDocument> {
        let multibase_key = did
            .strip_prefix("did:key:")
            .ok_or_else(|| CoreError::DidMalformed("not a did:key DID".into()))?;
        let key_bytes = decode_multibase(multibase_key)?;
        if key_bytes.len() < 2 {
            return Err(CoreError::DidMalformed(
                "did:key multibase payload too short".into(),
            ));
        }
        let method_type = if key_bytes[0..2] == ED25519_MULTICODEC {
            "Ed25519VerificationKey2020"
        } else if key_bytes[0..2] == SECP256K1_MULTICODEC {
            "EcdsaSecp256k1VerificationKey2019"
        } else {
            return Err(CoreError::DidMalformed(
                "unrecognized did:key multicodec prefix".into(),
            ));
        };
        let vm_id = format!("{did}#{multibase_key}");
        let vm = VerificationMethod {
            id: vm_id.clone(),
            method_type: method_type.to_string(),
            controller: did.to_string(),
            public_key_hex: None,
            public_key_multibase: Some(multibase_key.to_string()),
            blockchain_account_id: None,
        };
        Ok(DidDocument {
            id: did.to_string(),
            controller: None,
            verification_method: vec![vm],
            authentication: vec![vm_id],
            service: Vec::new(),
            deactivated: false,
        })
    }
}

/// `did:nlc:<64-hex>` -- resolved through an external on-chain registry
/// that this crate does not ship a client for. Always fails with
/// [`CoreError::UnsupportedDidMethod`]; a deployment that has a registry
/// client should implement [`DidMethodResolver`] itself and register it
/// ahead of this one via [`DidResolver::add_resolver`].
pub struct NlcResolver;

#[async_trait]
impl DidMethodResolver for NlcResolver {
    fn supports(&self, did: &str) -> bool {
        match did.strip_prefix("did:nlc:") {
            Some(id) => id.len() == 64 && id.chars().all(|c| c.is_ascii_hexdigit()),
            None => false,
        }
    }

    async fn resolve(&self, _did: &str) -> CoreResult<DidDocument> {
        Err(CoreError::UnsupportedDidMethod(
            "did:nlc requires an external registry resolver".into(),
        ))
    }
}

/// Decodes multibase data. Only the `z` (base58btc) prefix is supported,
/// since that is the only encoding the spec's `did:key` multicodec
/// prefixes use.
fn decode_multibase(encoded: &str) -> CoreResult<Vec<u8>> {
    let rest = encoded
        .strip_prefix('z')
        .ok_or_else(|| CoreError::DidMalformed("unsupported multibase prefix".into()))?;
    base58_decode(rest).ok_or_else(|| CoreError::DidMalformed("invalid base58btc payload".into()))
}

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Plain base58btc decode (Bitcoin alphabet), implemented directly since
/// this is the only call site that needs it.
fn base58_decode(input: &str) -> Option<Vec<u8>> {
    let mut digits: Vec<u8> = vec![0];
    for c in input.bytes() {
        let value = BASE58_ALPHABET.iter().position(|&b| b == c)? as u32;
        let mut carry = value;
        for digit in digits.iter_mut() {
            carry += (*digit as u32) * 58;
            *digit = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            digits.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    let leading_zeros = input.bytes().take_while(|&c| c == b'1').count();
    let mut out = vec![0u8; leading_zeros];
    out.extend(digits.into_iter().rev());
    Some(out)
}

/// Cache of resolved DID documents, keyed by DID, bounded to
/// [`CACHE_CAPACITY`] entries with a fixed 300-second TTL per entry.
struct DidCache {
    entries: Mutex<LruCache<String, (DidDocument, Instant)>>,
    ttl: Duration,
}

impl DidCache {
    fn new(ttl: Duration) -> Self {
        DidCache {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("cache capacity is nonzero"),
            )),
            ttl,
        }
    }

    fn get(&self, did: &str) -> Option<DidDocument> {
        let mut entries = self.entries.lock();
        match entries.get(did) {
            Some((doc, cached_at)) if cached_at.elapsed() < self.ttl => Some(doc.clone()),
            Some(_) => {
                entries.pop(did);
                None
            }
            None => None,
        }
    }

    fn insert(&self, did: &str, doc: DidDocument) {
        self.entries.lock().put(did.to_string(), (doc, Instant::now()));
    }

    /// Drops a cache entry outright, with no partial repopulation -- used
    /// when a `did:web` resolution in flight is cancelled.
    fn invalidate(&self, did: &str) {
        self.entries.lock().pop(did);
    }
}

/// Dispatches resolution to the method-specific resolver for a DID,
/// caching successes for 300 seconds. Malformed DIDs are rejected before
/// any resolver runs.
pub struct DidResolver {
    resolvers: Vec<Box<dyn DidMethodResolver>>,
    cache: DidCache,
}

impl DidResolver {
    /// The default resolver set: `Ethr`, `Web`, `Key`, `Nlc`, tried in that
    /// order.
    pub fn new() -> Self {
        Self::with_config(DidResolverConfig::default())
    }

    /// Same resolver set as [`DidResolver::new`], with cache TTL and
    /// `did:web` fetch timeout/retries taken from `config` instead of the
    /// built-in defaults.
    pub fn with_config(config: DidResolverConfig) -> Self {
        DidResolver {
            resolvers: vec![
                Box::new(EthrResolver),
                Box::new(WebResolver::with_config(config.web_timeout, config.web_max_retries)),
                Box::new(KeyResolver),
                Box::new(NlcResolver),
            ],
            cache: DidCache::new(config.cache_ttl),
        }
    }

    /// Registers a custom resolver ahead of the built-in ones, so it gets
    /// first refusal on any DID it supports.
    pub fn add_resolver(&mut self, resolver: Box<dyn DidMethodResolver>) {
        self.resolvers.insert(0, resolver);
    }

    fn validate_format(did: &str) -> CoreResult<()> {
        let valid = did.starts_with("did:")
            && did.len() > 4
            && did[4..].splitn(2, ':').count() == 2
            && did.chars().all(|c| {
                c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '%' | '-')
            })
            && did[4..]
                .split(':')
                .next()
                .map(|method| !method.is_empty() && method.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()))
                .unwrap_or(false);
        if valid {
            Ok(())
        } else {
            Err(CoreError::DidMalformed(did.to_string()))
        }
    }

    /// Resolves a DID to its document, trying the cache first and then
    /// each registered resolver in order.
    pub async fn resolve(&self, did: &str) -> CoreResult<DidDocument> {
        Self::validate_format(did)?;
        if let Some(cached) = self.cache.get(did) {
            return Ok(cached);
        }
        for resolver in &self.resolvers {
            if resolver.supports(did) {
                return match resolver.resolve(did).await {
                    Ok(doc) => {
                        self.cache.insert(did, doc.clone());
                        Ok(doc)
                    }
                    Err(err) => {
                        let class = match &err {
                            CoreError::NetworkTimeout | CoreError::NetworkError(_) => "network",
                            _ => "not-found",
                        };
                        log::warn!("DID resolution failed for {did}: {class}");
                        Err(err)
                    }
                };
            }
        }
        Err(CoreError::UnsupportedDidMethod(did.to_string()))
    }

    /// Drops any cached document for `did`, e.g. after a cancelled
    /// resolution.
    pub fn invalidate(&self, did: &str) {
        self.cache.invalidate(did);
    }

    /// Verifies `signature` over `message` against `did`'s primary
    /// verification method. Resolution failures propagate as errors;
    /// every signature-verification-specific failure (bad key encoding,
    /// bad signature, unsupported key type) collapses to `Ok(false)`
    /// rather than leaking which step failed.
    pub async fn verify_signature(&self, did: &str, message: &[u8], signature: &[u8]) -> CoreResult<bool> {
        let doc = self.resolve(did).await?;
        let vm = match doc.primary_verification_method() {
            Some(vm) => vm,
            None => return Ok(false),
        };
        let verified = if vm.method_type.contains("Secp256k1") {
            verify_secp256k1_eip191(vm, message, signature)
        } else if vm.method_type.contains("Ed25519") {
            verify_ed25519(vm, message, signature)
        } else {
            false
        };
        Ok(verified)
    }
}

impl Default for DidResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// EIP-191 "personal_sign" digest: `keccak("\x19Ethereum Signed
/// Message:\n" ‖ len(message) ‖ message)`.
fn eip191_digest(message: &[u8]) -> [u8; 32] {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

fn verify_secp256k1_eip191(vm: &VerificationMethod, message: &[u8], signature: &[u8]) -> bool {
    (|| -> Option<bool> {
        let account_id = vm.blockchain_account_id.as_ref()?;
        let expected_address = account_id.rsplit(':').next()?.to_lowercase();
        if signature.len() != 65 {
            return Some(false);
        }
        let recovery_byte = signature[64];
        let recovery_id_value = if recovery_byte >= 27 {
            recovery_byte - 27
        } else {
            recovery_byte
        };
        let recovery_id = RecoveryId::from_i32(recovery_id_value as i32).ok()?;
        let recoverable = RecoverableSignature::from_compact(&signature[0..64], recovery_id).ok()?;
        let digest = eip191_digest(message);
        let msg = Message::from_digest_slice(&digest).ok()?;
        let secp = Secp256k1::new();
        let recovered = secp.recover_ecdsa(&msg, &recoverable).ok()?;
        let uncompressed = recovered.serialize_uncompressed();
        let address_hash = Keccak256::digest(&uncompressed[1..]);
        let recovered_address = format!("0x{}", hex::encode(&address_hash[12..32]));
        Some(recovered_address.to_lowercase() == expected_address.to_lowercase())
    })()
    .unwrap_or(false)
}

fn verify_ed25519(vm: &VerificationMethod, message: &[u8], signature: &[u8]) -> bool {
    (|| -> Option<bool> {
        let public_key_bytes: Vec<u8> = if let Some(hex_key) = &vm.public_key_hex {
            hex::decode(hex_key).ok()?
        } else if let Some(multibase) = &vm.public_key_multibase {
            let decoded = decode_multibase(multibase).ok()?;
            if decoded.len() > 2 && decoded[0..2] == ED25519_MULTICODEC {
                decoded[2..].to_vec()
            } else {
                decoded
            }
        } else {
            return None;
        };
        if public_key_bytes.len() != 32 || signature.len() != 64 {
            return Some(false);
        }
        let key_array: [u8; 32] = public_key_bytes.try_into().ok()?;
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&key_array).ok()?;
        let sig_array: [u8; 64] = signature.try_into().ok()?;
        let sig = ed25519_dalek::Signature::from_bytes(&sig_array);
        Some(verifying_key.verify_strict(message, &sig).is_ok())
    })()
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base58_round_trips_known_vector() {
        // "Hello World" encodes to "JxF12TrwUP45BMd" in base58btc.
        let decoded = base58_decode("JxF12TrwUP45BMd").unwrap();
        assert_eq!(decoded, b"Hello World");
    }

    #[tokio::test]
    async fn ethr_resolver_builds_document_without_network() {
        let doc = EthrResolver
            .resolve("did:ethr:0x1111111111111111111111111111111111111111")
            .await
            .unwrap();
        assert_eq!(doc.id, "did:ethr:0x1111111111111111111111111111111111111111");
        assert_eq!(doc.verification_method.len(), 1);
        assert!(doc.verification_method[0]
            .blockchain_account_id
            .as_ref()
            .unwrap()
            .contains("eip155:1:"));
    }

    #[tokio::test]
    async fn ethr_resolver_rejects_malformed_address() {
        assert!(EthrResolver.resolve("did:ethr:not-an-address").await.is_err());
    }

    #[tokio::test]
    async fn key_resolver_decodes_ed25519_multicodec() {
        // Multicodec 0xed01 followed by 32 zero bytes, base58-encoded.
        let mut key_bytes = vec![0xed, 0x01];
        key_bytes.extend_from_slice(&[0u8; 32]);
        let encoded = base58_encode(&key_bytes);
        let did = format!("did:key:z{encoded}");
        let doc = KeyResolver.resolve(&did).await.unwrap();
        assert_eq!(doc.verification_method[0].method_type, "Ed25519VerificationKey2020");
    }

    #[tokio::test]
    async fn nlc_resolver_is_opaque() {
        let did = format!("did:nlc:{}", "a".repeat(64));
        assert!(NlcResolver.resolve(&did).await.is_err());
    }

    #[tokio::test]
    async fn universal_resolver_rejects_malformed_dids() {
        let resolver = DidResolver::new();
        assert!(resolver.resolve("not-a-did").await.is_err());
    }

    #[tokio::test]
    async fn universal_resolver_caches_ethr_resolution() {
        let resolver = DidResolver::new();
        let did = "did:ethr:0x2222222222222222222222222222222222222222";
        let first = resolver.resolve(did).await.unwrap();
        let second = resolver.resolve(did).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    fn base58_encode(input: &[u8]) -> String {
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
            out.push(BASE58_ALPHABET[d as usize] as char);
        }
        out
    }
}
