//! Poseidon-style sponge hash over the BN254 scalar field (C3).
//!
//! This is deliberately NOT circomlib's Poseidon: round constants come from
//! repeated Keccak-256 hashing rather than circomlib's grain-LFSR generator,
//! so outputs are internally consistent (deterministic, collision-resistant
//! in this crate's own terms) but not bit-compatible with a circomlib
//! circuit. See `SPEC_FULL.md` section 9 for why that tradeoff is accepted
//! here — the crate produces inputs for an external prover, it does not
//! verify circuits itself.

use ark_bn254::Fr;
use ark_ff::{Field, One, PrimeField, Zero};
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::hashing::poseidon_constants_domain;

const FULL_ROUNDS: usize = 8;

fn partial_rounds(width: usize) -> usize {
    match width {
        2 => 56,
        3 => 57,
        4 => 56,
        5 => 60,
        6 => 60,
        7 => 63,
        8 => 64,
        _ => 60,
    }
}

/// A fully-parameterized Poseidon instance for a fixed state width `t`.
/// Round constants and the MDS matrix are derived once, at construction,
/// and reused for every `hash` call at that width.
pub struct Poseidon {
    width: usize,
    full_rounds: usize,
    partial_rounds: usize,
    /// `round_constants[round][slot]`.
    round_constants: Vec<Vec<Fr>>,
    /// `mds[i][j]`.
    mds: Vec<Vec<Fr>>,
}

impl Poseidon {
    /// Builds (or reuses a cached) instance for state width `t = k + 1`,
    /// where `k` is the number of field elements being hashed.
    pub fn for_width(width: usize) -> &'static Poseidon {
        static CACHE: Mutex<Option<HashMap<usize, &'static Poseidon>>> = Mutex::new(None);
        let mut guard = CACHE.lock().expect("poseidon cache mutex poisoned");
        let map = guard.get_or_insert_with(HashMap::new);
        if let Some(existing) = map.get(&width) {
            return existing;
        }
        let instance = Box::leak(Box::new(Poseidon::build(width)));
        map.insert(width, instance);
        instance
    }

    fn build(width: usize) -> Poseidon {
        assert!(width >= 2, "poseidon state width must be >= 2, got {width}");
        let full_rounds = FULL_ROUNDS;
        let partial_rounds = partial_rounds(width);
        let total_rounds = full_rounds + partial_rounds;
        let round_constants = generate_round_constants(width, total_rounds);
        let mds = build_mds(width);
        // Widths 2 and 3 are literal constants and must be checked by brute
        // force. Width >= 4 is a Cauchy matrix, which is MDS by
        // construction whenever all x_i, all y_j are distinct and every
        // x_i + y_j is nonzero -- `build_mds` already enforces the latter
        // via the `.expect()` on each denominator inverse, and distinctness
        // follows from `x_i = i`, `y_j = t + j` ranging over disjoint
        // integers.
        if width == 2 || width == 3 {
            verify_mds_nonsingular(&mds);
        }
        log::info!("Poseidon parameters built and verified for width {width}");
        Poseidon {
            width,
            full_rounds,
            partial_rounds,
            round_constants,
            mds,
        }
    }

    /// Hashes `inputs.len()` field elements (state width `inputs.len() + 1`,
    /// capacity slot initialized to zero).
    pub fn hash(inputs: &[Fr]) -> Fr {
        let width = inputs.len() + 1;
        let instance = Poseidon::for_width(width);
        instance.permute(inputs)
    }

    /// Hashes raw bytes: left-pads to 32 bytes, reduces mod `P_bn`, and
    /// hashes as a single-element input.
    pub fn hash_bytes(data: &[u8]) -> Fr {
        let scalar = Fr::from_be_bytes_mod_order(data);
        Poseidon::hash(&[scalar])
    }

    /// Hashes multiple field elements and serializes the result as 32
    /// big-endian bytes.
    pub fn hash_to_bytes(inputs: &[Fr]) -> [u8; 32] {
        let digest = Poseidon::hash(inputs);
        let bytes = digest.into_bigint().to_bytes_be();
        let mut out = [0u8; 32];
        let offset = 32 - bytes.len();
        out[offset..].copy_from_slice(&bytes);
        out
    }

    fn permute(&self, inputs: &[Fr]) -> Fr {
        assert_eq!(
            inputs.len() + 1,
            self.width,
            "poseidon instance width mismatch"
        );
        let mut state = vec![Fr::zero(); self.width];
        state[1..].copy_from_slice(inputs);

        let half_full = self.full_rounds / 2;
        for round in 0..(self.full_rounds + self.partial_rounds) {
            for (slot, value) in state.iter_mut().enumerate() {
                *value += self.round_constants[round][slot];
            }
            let is_full_round = round < half_full || round >= half_full + self.partial_rounds;
            if is_full_round {
                for value in state.iter_mut() {
                    *value = sbox(*value);
                }
            } else {
                state[0] = sbox(state[0]);
            }
            state = self.apply_mds(&state);
        }
        state[0]
    }

    fn apply_mds(&self, state: &[Fr]) -> Vec<Fr> {
        let mut out = vec![Fr::zero(); self.width];
        for (i, row) in self.mds.iter().enumerate() {
            let mut acc = Fr::zero();
            for (j, coeff) in row.iter().enumerate() {
                acc += *coeff * state[j];
            }
            out[i] = acc;
        }
        out
    }
}

fn sbox(x: Fr) -> Fr {
    x.pow([5u64])
}

/// Deterministic round-constant generation: seed = `keccak(domain)` where
/// `domain = "poseidon_constants_t<t>"`; for each round and each state slot,
/// `seed = keccak(seed)`, constant = `seed` reduced mod `P_bn`.
fn generate_round_constants(width: usize, total_rounds: usize) -> Vec<Vec<Fr>> {
    let domain = poseidon_constants_domain(width);
    let mut seed: [u8; 32] = Keccak256::digest(&domain).into();
    let mut constants = Vec::with_capacity(total_rounds);
    for _ in 0..total_rounds {
        let mut round = Vec::with_capacity(width);
        for _ in 0..width {
            seed = Keccak256::digest(seed).into();
            round.push(Fr::from_be_bytes_mod_order(&seed));
        }
        constants.push(round);
    }
    constants
}

/// Width 2 and 3 use literal constants (verified MDS); width >= 4 uses a
/// generated Cauchy matrix `M[i][j] = (i + t + j)^-1`.
fn build_mds(width: usize) -> Vec<Vec<Fr>> {
    match width {
        2 => vec![
            vec![Fr::from(2u64), Fr::one()],
            vec![Fr::one(), Fr::from(3u64)],
        ],
        3 => vec![
            vec![Fr::from(2u64), Fr::one(), Fr::one()],
            vec![Fr::one(), Fr::from(3u64), Fr::one()],
            vec![Fr::one(), Fr::one(), Fr::from(4u64)],
        ],
        _ => {
            let mut m = vec![vec![Fr::zero(); width]; width];
            for (i, row) in m.iter_mut().enumerate() {
                for (j, cell) in row.iter_mut().enumerate() {
                    let x_i = Fr::from(i as u64);
                    let y_j = Fr::from((width + j) as u64);
                    let denom = x_i + y_j;
                    *cell = denom
                        .inverse()
                        .expect("Cauchy matrix denominator i + t + j must be nonzero");
                }
            }
            m
        }
    }
}

/// Verifies every square submatrix of `mds` has a nonzero determinant.
/// Called once at construction time for every width; panics (fatal,
/// construction-time invariant) if the matrix is not MDS.
fn verify_mds_nonsingular(mds: &[Vec<Fr>]) {
    let n = mds.len();
    for size in 1..=n {
        for rows in combinations(n, size) {
            for cols in combinations(n, size) {
                let sub: Vec<Vec<Fr>> = rows
                    .iter()
                    .map(|&r| cols.iter().map(|&c| mds[r][c]).collect())
                    .collect();
                if determinant(&sub).is_zero() {
                    panic!(
                        "Poseidon MDS matrix has a singular {size}x{size} submatrix; \
                         round-constant or matrix generation is broken"
                    );
                }
            }
        }
    }
}

fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    if k == 0 {
        return vec![vec![]];
    }
    if k > n {
        return vec![];
    }
    let mut result = Vec::new();
    let mut indices: Vec<usize> = (0..k).collect();
    loop {
        result.push(indices.clone());
        let mut i = k;
        loop {
            if i == 0 {
                return result;
            }
            i -= 1;
            if indices[i] != i + n - k {
                break;
            }
            if i == 0 {
                return result;
            }
        }
        indices[i] += 1;
        for j in (i + 1)..k {
            indices[j] = indices[j - 1] + 1;
        }
    }
}

fn determinant(matrix: &[Vec<Fr>]) -> Fr {
    let n = matrix.len();
    if n == 0 {
        return Fr::one();
    }
    if n == 1 {
        return matrix[0][0];
    }
    let mut total = Fr::zero();
    for col in 0..n {
        let minor: Vec<Vec<Fr>> = matrix[1..]
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(j, _)| *j != col)
                    .map(|(_, v)| *v)
                    .collect()
            })
            .collect();
        let cofactor = determinant(&minor);
        let term = matrix[0][col] * cofactor;
        if col % 2 == 0 {
            total += term;
        } else {
            total -= term;
        }
    }
    total
}
