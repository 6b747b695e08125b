//! Key rotation proofs
//!
//! A rotation proof is a statement signed by an agent's *old* key
//! consenting to a new key taking over the same logical identity. The proof
//! does not itself issue a passport; [`rotate`] produces the new passport
//! and the proof together so the transition is auditable.

use convoy_core::{canonical_json, time, Aid, KeyPair, Signature};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::passport::{IssueOptions, Passport};

/// Signed consent to transition authority from `old_did` to `new_did`.
///
/// The signature is by the OLD key over the canonical JSON of
/// `{oldDid, newDid, newPublicKey, timestamp}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RotationProof {
    pub old_did: Aid,
    pub new_did: Aid,
    /// Lowercase hex of the new 32-byte public key.
    pub new_public_key: String,
    /// Unix seconds at which the transition was asserted.
    pub timestamp: u64,
    /// Lowercase hex of the 64-byte signature by the old key.
    pub signature: String,
}

impl RotationProof {
    /// Create a proof transitioning `old` to `new`, signed by the old key.
    pub fn create(old: &KeyPair, new: &KeyPair) -> Result<Self> {
        let new_public = new.public_key();
        let mut proof = Self {
            old_did: Aid::from_public_key(&old.public_key()),
            new_did: Aid::from_public_key(&new_public),
            new_public_key: new_public.to_hex(),
            timestamp: time::now_seconds(),
            signature: String::new(),
        };

        let message = proof.signed_image()?;
        proof.signature = old.sign(&message).to_hex();
        Ok(proof)
    }

    /// Verify the proof under the old key extracted from `old_did`.
    ///
    /// Also checks that `new_public_key` agrees with `new_did`, so the two
    /// assertions about the successor cannot diverge. Any failure returns
    /// `false`; no error escapes.
    pub fn verify(&self) -> bool {
        let Ok(old_key) = self.old_did.public_key() else {
            return false;
        };
        let Ok(new_key) = self.new_did.public_key() else {
            return false;
        };
        if self.new_public_key != new_key.to_hex() {
            return false;
        }

        let Ok(message) = self.signed_image() else {
            return false;
        };
        let Ok(signature) = Signature::from_hex(&self.signature) else {
            return false;
        };
        old_key.verify(&message, &signature)
    }

    fn signed_image(&self) -> Result<Vec<u8>> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("signature");
        }
        Ok(canonical_json(&value)?.into_bytes())
    }
}

/// Rotate a passport to a new key pair.
///
/// Returns a new passport issued under `new` that preserves the old
/// passport's capabilities, plus the rotation proof linking the two
/// identities. Fails if `old` is not the key pair the old passport was
/// issued to.
pub fn rotate(
    old_passport: &Passport,
    old: &KeyPair,
    new: &KeyPair,
    options: &IssueOptions,
) -> Result<(Passport, RotationProof)> {
    let old_did = Aid::from_public_key(&old.public_key());
    if old_did != old_passport.did {
        return Err(Error::RotationMismatch(format!(
            "key pair does not match passport holder {}",
            old_passport.did
        )));
    }

    let proof = RotationProof::create(old, new)?;
    let passport = Passport::issue(new, old_passport.capabilities.clone(), options)?;
    Ok((passport, proof))
}
