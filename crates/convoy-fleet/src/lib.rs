#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! Fleet-level trust primitives for convoy.
//!
//! This crate implements the agent-facing half of the trust substrate:
//! - Passports: signed, optionally time-bounded capability assertions
//! - Rotation proofs: signed consent to move an identity to a new key
//! - The directory: capability/identifier lookup used to route RPC calls
//!
//! Everything signed here goes through canonical JSON (RFC 8785) from
//! `convoy-core`, so passports verify identically across implementations.

mod directory;
mod error;
mod passport;
mod rotation;
mod types;

pub use directory::{
    default_directory, install_default_directory, DirectoryProvider, InMemoryDirectory,
};
pub use error::{Error, Result};
pub use passport::{verify_batch, BatchVerdict, IssueOptions, Passport, VerifyOptions};
pub use rotation::{rotate, RotationProof};
pub use types::{AgentMetadata, CapabilityDescriptor, DirectoryQuery, Endpoints};
