#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! # convoy-core
//!
//! Cryptographic and identity primitives for the convoy agent stack.
//!
//! This crate provides:
//! - Canonical JSON (RFC 8785 JCS) used as the pre-image for every signature
//! - Ed25519 key pairs, signing, and verification
//! - Self-certifying agent identifiers (`did:key` AIDs)
//!
//! ## Quick Start
//!
//! ```rust
//! use convoy_core::{Aid, KeyPair};
//!
//! let keypair = KeyPair::generate();
//! let aid = Aid::from_public_key(&keypair.public_key());
//! assert!(aid.as_str().starts_with("did:key:z"));
//!
//! // The identifier carries its own verifier.
//! let recovered = aid.public_key().unwrap();
//! assert_eq!(recovered, keypair.public_key());
//! ```

pub mod aid;
pub mod canonical;
pub mod error;
pub mod keys;
pub mod time;

pub use aid::{is_valid_aid, parse_aid, Aid, ParsedAid};
pub use canonical::{canonical_json, signing_bytes};
pub use error::{Error, Result};
pub use keys::{
    derive_public, is_valid_private_key, is_valid_public_key, KeyPair, PublicKey, Signature,
};

/// Commonly used types
pub mod prelude {
    pub use crate::{canonical_json, signing_bytes, Aid, Error, KeyPair, PublicKey, Result, Signature};
}
