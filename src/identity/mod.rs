//! Identity & DID authentication (C7).
//!
//! Three pieces, split the way the resolver/authenticator/secret split
//! shows up in `examples/original_source/src/rra/identity/` and
//! `.../rra/auth/did_auth.py`: DID resolution and signature verification
//! (`did`), challenge-response session/token lifecycle (`auth`), and the
//! identity-secret-to-Poseidon-hash commitment used by the external ZK
//! prover (`identity_secret`).

pub mod auth;
pub mod did;
pub mod identity_secret;

pub use auth::{
    AuthChallenge, AuthResult, AuthSession, AuthStatus, AuthenticatorConfig, DidAuthenticator,
    IdentityScoreSource,
};
pub use did::{
    DidDocument, DidMethod, DidMethodResolver, DidResolver, DidResolverConfig, ServiceEndpoint,
    VerificationMethod,
};
pub use identity_secret::{
    compute_identity_hash, derive_identity_from_signature, generate_identity, DisputeIdentity,
};
