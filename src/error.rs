//! Crate-wide error taxonomy.
//!
//! One flat enum carries every failure mode the core can produce. Variants
//! are grouped in doc comments by the taxonomy in the design spec
//! (validation / cryptographic / authentication flow / resolution /
//! transient) but live in a single type, matching how `CryptoError`
//! is shaped elsewhere in this codebase.

/// Errors produced by the cryptographic and identity core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    // --- Validation ---
    #[error("invalid length: {0}")]
    InvalidLength(String),

    #[error("invalid point: {0}")]
    InvalidPoint(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid threshold configuration: {0}")]
    BadThreshold(String),

    #[error("invalid holder list: {0}")]
    BadHolders(String),

    #[error("duplicate share index: {0}")]
    DuplicateIndex(u8),

    #[error("invalid share index: {0}")]
    InvalidIndex(u8),

    // --- Cryptographic ---
    #[error("commitment mismatch")]
    CommitmentMismatch,

    #[error("no commitment found for context: {0}")]
    CommitmentNotFound(String),

    #[error("commitment is the point at infinity")]
    PointAtInfinity,

    #[error("key commitment mismatch")]
    KeyMismatch,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid password")]
    InvalidPassword,

    // --- Authentication flow ---
    #[error("challenge not found")]
    ChallengeNotFound,

    #[error("challenge has expired")]
    ChallengeExpired,

    #[error("session not found")]
    SessionNotFound,

    #[error("session is invalid or expired")]
    SessionInvalid,

    #[error("invalid token")]
    InvalidToken,

    #[error("token has expired")]
    TokenExpired,

    #[error("insufficient scope: {0}")]
    InsufficientScope(String),

    #[error("identity score {actual:.2} below minimum {required:.2}")]
    InsufficientScore { actual: f64, required: f64 },

    // --- Resolution ---
    #[error("DID resolution failed: {0}")]
    DidResolutionError(String),

    #[error("unsupported DID method: {0}")]
    UnsupportedDidMethod(String),

    #[error("malformed DID: {0}")]
    DidMalformed(String),

    // --- Secret sharing specific ---
    #[error("insufficient shares: need {needed}, have {available}")]
    InsufficientShares { needed: usize, available: usize },

    // --- Transient ---
    #[error("network timeout")]
    NetworkTimeout,

    #[error("network error: {0}")]
    NetworkError(String),
}

/// Result type used throughout the core.
pub type CoreResult<T> = Result<T, CoreError>;
