//! Shamir (t, n) threshold secret sharing (C6).
//!
//! A distinct prime field from BN254's own `Fq`/`Fr`: `P_s = 2^256 - 189`.
//! Neither `ark-bn254` nor `ark-ff` apply here, so this module carries its
//! own big-integer modular arithmetic over `num-bigint`, the same way the
//! code this crate is descended from hand-rolled its own big-integer
//! arithmetic in Python rather than reuse a curve library's field type.

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand_core::{OsRng, RngCore};
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

use crate::error::{CoreError, CoreResult};

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs()
}

/// `P_s = 2^256 - 189`.
fn prime() -> &'static BigUint {
    static P: OnceLock<BigUint> = OnceLock::new();
    P.get_or_init(|| {
        let two_256 = BigUint::one() << 256u32;
        let p = two_256 - BigUint::from(189u32);
        if !is_probably_prime(&p, 40) {
            panic!("Shamir prime P_s = 2^256 - 189 failed Miller-Rabin at 40 rounds");
        }
        log::info!("Shamir prime P_s = 2^256 - 189 passed Miller-Rabin at 40 rounds");
        p
    })
}

/// Miller-Rabin primality test, run once at module initialization against
/// the hardcoded prime constant. Failure here indicates a corrupted
/// constant, not a runtime condition, so it is fatal.
fn is_probably_prime(n: &BigUint, rounds: u32) -> bool {
    let one = BigUint::one();
    let two = &one + &one;
    if *n == two {
        return true;
    }
    if n.is_even() || *n < two {
        return false;
    }
    let n_minus_one = n - &one;
    let mut d = n_minus_one.clone();
    let mut r = 0u32;
    while d.is_even() {
        d >>= 1u32;
        r += 1;
    }

    'witness: for _ in 0..rounds {
        let a = random_in_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 0..(r - 1) {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

fn random_in_range(low: &BigUint, high: &BigUint) -> BigUint {
    let span = high - low;
    let bytes_len = span.to_bytes_be().len().max(1) + 8;
    loop {
        let mut buf = vec![0u8; bytes_len];
        OsRng.fill_bytes(&mut buf);
        let candidate = BigUint::from_bytes_be(&buf) % &span;
        return low + candidate;
    }
}

trait BigUintParity {
    fn is_even(&self) -> bool;
}

impl BigUintParity for BigUint {
    fn is_even(&self) -> bool {
        !self.bit(0)
    }
}

/// Modular inverse via Fermat's little theorem: `a^(p-2) mod p`, valid
/// since `P_s` is prime.
fn mod_inverse(a: &BigUint) -> CoreResult<BigUint> {
    if a.is_zero() {
        return Err(CoreError::InvalidLength(
            "cannot invert zero in the Shamir field".into(),
        ));
    }
    let p = prime();
    let exponent = p - BigUint::from(2u32);
    Ok(a.modpow(&exponent, p))
}

/// Montgomery's batch-inversion trick over the Shamir field.
fn batch_mod_inverse(values: &[BigUint]) -> CoreResult<Vec<BigUint>> {
    let p = prime();
    if values.iter().any(|v| v.is_zero()) {
        return Err(CoreError::InvalidLength(
            "batch inverse: zero value has no inverse".into(),
        ));
    }
    let n = values.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let mut prefix = Vec::with_capacity(n);
    let mut acc = BigUint::one();
    for v in values {
        acc = (&acc * v) % p;
        prefix.push(acc.clone());
    }
    let mut inv_acc = mod_inverse(&acc)?;
    let mut result = vec![BigUint::zero(); n];
    for i in (0..n).rev() {
        let prefix_before = if i == 0 {
            BigUint::one()
        } else {
            prefix[i - 1].clone()
        };
        result[i] = (&inv_acc * &prefix_before) % p;
        inv_acc = (&inv_acc * &values[i]) % p;
    }
    Ok(result)
}

fn mod_sub(a: &BigUint, b: &BigUint) -> BigUint {
    let p = prime();
    if a >= b {
        (a - b) % p
    } else {
        (p - (b - a)) % p
    }
}

/// One share of a split secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShare {
    pub index: u8,
    pub value: [u8; 32],
    pub threshold: u8,
    pub total_shares: u8,
    pub holder: String,
    pub context_id: String,
    pub created_at: u64,
    /// `keccak(secret)`, identical across every share of the same split.
    pub commitment: [u8; 32],
}

impl KeyShare {
    /// On-chain compact form: `index(1) ‖ threshold(2) ‖ total(2) ‖
    /// value(32) ‖ context_len(2) ‖ context_utf8 ‖ commitment(32)`, all
    /// integers big-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let context_bytes = self.context_id.as_bytes();
        let mut out = Vec::with_capacity(1 + 2 + 2 + 32 + 2 + context_bytes.len() + 32);
        out.push(self.index);
        out.extend_from_slice(&(self.threshold as u16).to_be_bytes());
        out.extend_from_slice(&(self.total_shares as u16).to_be_bytes());
        out.extend_from_slice(&self.value);
        out.extend_from_slice(&(context_bytes.len() as u16).to_be_bytes());
        out.extend_from_slice(context_bytes);
        out.extend_from_slice(&self.commitment);
        out
    }

    /// Inverse of [`KeyShare::to_bytes`]. `holder` and `created_at` are not
    /// part of the on-chain wire form and are supplied by the caller.
    pub fn from_bytes(bytes: &[u8], holder: String, created_at: u64) -> CoreResult<Self> {
        if bytes.len() < 1 + 2 + 2 + 32 + 2 + 32 {
            return Err(CoreError::InvalidLength(
                "Shamir share wire form is truncated".into(),
            ));
        }
        let index = bytes[0];
        let threshold = u16::from_be_bytes([bytes[1], bytes[2]]) as u8;
        let total_shares = u16::from_be_bytes([bytes[3], bytes[4]]) as u8;
        let mut value = [0u8; 32];
        value.copy_from_slice(&bytes[5..37]);
        let context_len = u16::from_be_bytes([bytes[37], bytes[38]]) as usize;
        let context_start = 39;
        let context_end = context_start + context_len;
        if bytes.len() != context_end + 32 {
            return Err(CoreError::InvalidLength(
                "Shamir share wire form length does not match context_len".into(),
            ));
        }
        let context_id = String::from_utf8(bytes[context_start..context_end].to_vec())
            .map_err(|e| CoreError::InvalidLength(format!("context is not valid utf8: {e}")))?;
        let mut commitment = [0u8; 32];
        commitment.copy_from_slice(&bytes[context_end..context_end + 32]);
        Ok(KeyShare {
            index,
            value,
            threshold,
            total_shares,
            holder,
            context_id,
            created_at,
            commitment,
        })
    }
}

/// `(t, n)` threshold configuration plus the holder list, validated once at
/// split time.
#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    pub threshold: u8,
    pub total_shares: u8,
    pub holders: Vec<String>,
}

impl ThresholdConfig {
    pub fn new(threshold: u8, total_shares: u8, holders: Vec<String>) -> CoreResult<Self> {
        if threshold < 2 || threshold > total_shares || total_shares > 255 {
            return Err(CoreError::BadThreshold(format!(
                "require 2 <= t <= n <= 255, got t={threshold}, n={total_shares}"
            )));
        }
        if holders.len() != total_shares as usize {
            return Err(CoreError::BadHolders(format!(
                "expected {total_shares} holders, got {}",
                holders.len()
            )));
        }
        Ok(ThresholdConfig {
            threshold,
            total_shares,
            holders,
        })
    }
}

/// Splits a 32-byte secret into `config.total_shares` shares, any
/// `config.threshold` of which reconstruct it.
pub fn split(secret: &[u8], config: &ThresholdConfig, context_id: &str) -> CoreResult<Vec<KeyShare>> {
    if secret.len() != 32 {
        return Err(CoreError::InvalidLength(format!(
            "Shamir secret must be 32 bytes, got {}",
            secret.len()
        )));
    }
    let p = prime();
    let s = BigUint::from_bytes_be(secret) % p;
    let commitment: [u8; 32] = Keccak256::digest(secret).into();
    let created_at = now_unix();

    let mut coefficients = Vec::with_capacity(config.threshold as usize - 1);
    for _ in 1..config.threshold {
        coefficients.push(random_field_element());
    }

    let mut shares = Vec::with_capacity(config.total_shares as usize);
    for i in 1..=config.total_shares {
        let x = BigUint::from(i);
        let y = evaluate_horner(&s, &coefficients, &x, p);
        shares.push(KeyShare {
            index: i,
            value: biguint_to_32_bytes(&y),
            threshold: config.threshold,
            total_shares: config.total_shares,
            holder: config.holders[(i - 1) as usize].clone(),
            context_id: context_id.to_string(),
            created_at,
            commitment,
        });
    }
    Ok(shares)
}

fn random_field_element() -> BigUint {
    let p = prime();
    loop {
        let mut buf = [0u8; 32];
        OsRng.fill_bytes(&mut buf);
        let candidate = BigUint::from_bytes_be(&buf);
        if candidate < *p {
            return candidate;
        }
    }
}

/// Horner's method: `f(x) = s + a_1*x + a_2*x^2 + ... + a_{t-1}*x^{t-1} mod p`,
/// evaluated as `((...(a_{t-1}*x + a_{t-2})*x + ...)*x + a_1)*x + s`.
fn evaluate_horner(secret: &BigUint, coefficients: &[BigUint], x: &BigUint, p: &BigUint) -> BigUint {
    let mut acc = coefficients.last().cloned().unwrap_or_else(BigUint::zero);
    for coeff in coefficients.iter().rev().skip(1) {
        acc = (&acc * x + coeff) % p;
    }
    if !coefficients.is_empty() {
        acc = (&acc * x) % p;
    }
    (&acc + secret) % p
}

fn biguint_to_32_bytes(value: &BigUint) -> [u8; 32] {
    let bytes = value.to_bytes_be();
    let mut out = [0u8; 32];
    let offset = 32 - bytes.len();
    out[offset..].copy_from_slice(&bytes);
    out
}

/// Reconstructs the secret from `>= threshold` shares. Fails closed:
/// duplicate indices, a zero index, too few shares, or a commitment
/// mismatch all return an error instead of a (possibly wrong) secret.
pub fn reconstruct(shares: &[KeyShare]) -> CoreResult<[u8; 32]> {
    if shares.is_empty() {
        return Err(CoreError::InsufficientShares {
            needed: 1,
            available: 0,
        });
    }
    let threshold = shares[0].threshold as usize;
    if shares.len() < threshold {
        return Err(CoreError::InsufficientShares {
            needed: threshold,
            available: shares.len(),
        });
    }

    let mut seen = std::collections::HashSet::new();
    for share in shares {
        if share.index == 0 {
            return Err(CoreError::InvalidIndex(0));
        }
        if !seen.insert(share.index) {
            return Err(CoreError::DuplicateIndex(share.index));
        }
    }

    let used: Vec<&KeyShare> = shares.iter().take(threshold).collect();
    let p = prime();
    let xs: Vec<BigUint> = used.iter().map(|s| BigUint::from(s.index)).collect();
    let ys: Vec<BigUint> = used
        .iter()
        .map(|s| BigUint::from_bytes_be(&s.value))
        .collect();

    let mut denominators = Vec::with_capacity(used.len());
    for (i, xi) in xs.iter().enumerate() {
        let mut denom = BigUint::one();
        for (j, xj) in xs.iter().enumerate() {
            if i != j {
                denom = (&denom * mod_sub(xi, xj)) % p;
            }
        }
        denominators.push(denom);
    }
    let inv_denominators = batch_mod_inverse(&denominators)?;

    let mut secret = BigUint::zero();
    for i in 0..used.len() {
        let mut numerator = BigUint::one();
        for (j, xj) in xs.iter().enumerate() {
            if i != j {
                numerator = (&numerator * mod_sub(&BigUint::zero(), xj)) % p;
            }
        }
        let lagrange_i = (&numerator * &inv_denominators[i]) % p;
        secret = (&secret + (&ys[i] * lagrange_i)) % p;
    }

    let reconstructed = biguint_to_32_bytes(&secret);
    let expected_commitment: [u8; 32] = Keccak256::digest(reconstructed).into();
    if !bool::from(expected_commitment.ct_eq(&shares[0].commitment)) {
        log::warn!("Shamir reconstruction failed: recomputed commitment does not match shares");
        return Err(CoreError::CommitmentMismatch);
    }
    Ok(reconstructed)
}

/// Checks one share in isolation: combine it with `t - 1` other distinct
/// shares and attempt reconstruction plus the commitment check. Fails
/// closed with `InsufficientShares` when fewer than `t - 1` others are
/// supplied -- "cannot verify yet" must never be reported as "valid".
pub fn verify_share(share: &KeyShare, other_shares: &[KeyShare]) -> CoreResult<bool> {
    let needed_others = share.threshold as usize - 1;
    if other_shares.len() < needed_others {
        return Err(CoreError::InsufficientShares {
            needed: needed_others,
            available: other_shares.len(),
        });
    }
    let mut quorum = Vec::with_capacity(1 + needed_others);
    quorum.push(share.clone());
    quorum.extend(other_shares.iter().take(needed_others).cloned());
    match reconstruct(&quorum) {
        Ok(_) => Ok(true),
        Err(CoreError::CommitmentMismatch) => Ok(false),
        Err(other) => Err(other),
    }
}

/// Escrow workflow: split a viewing key across a council under a context,
/// hand out one share per holder, and reconstruct once a quorum returns.
pub struct EscrowManager;

impl EscrowManager {
    /// Splits `viewing_key_bytes` under `context` and returns a share per
    /// holder, keyed by holder name.
    pub fn escrow(
        viewing_key_bytes: &[u8],
        config: &ThresholdConfig,
        context: &str,
    ) -> CoreResult<HashMap<String, KeyShare>> {
        let shares = split(viewing_key_bytes, config, context)?;
        Ok(shares.into_iter().map(|s| (s.holder.clone(), s)).collect())
    }

    /// Reconstructs the secret from whatever shares were returned for
    /// `context`. Shares claiming a different `context_id` are rejected
    /// before reconstruction is attempted.
    pub fn recover(context: &str, provided_shares: &[KeyShare]) -> CoreResult<[u8; 32]> {
        for share in provided_shares {
            if share.context_id != context {
                return Err(CoreError::BadHolders(format!(
                    "share for context {} supplied to recover({context}, ..)",
                    share.context_id
                )));
            }
        }
        reconstruct(provided_shares)
    }

    /// True iff enough of `available_holders` hold a share of `all_shares`
    /// for `context` to meet that split's threshold.
    pub fn can_reconstruct(context: &str, available_holders: &[String], all_shares: &[KeyShare]) -> bool {
        let context_shares: Vec<&KeyShare> = all_shares
            .iter()
            .filter(|s| s.context_id == context)
            .collect();
        let Some(threshold) = context_shares.first().map(|s| s.threshold as usize) else {
            return false;
        };
        let available: std::collections::HashSet<&String> = available_holders.iter().collect();
        let holding = context_shares
            .iter()
            .filter(|s| available.contains(&s.holder))
            .count();
        holding >= threshold
    }
}
