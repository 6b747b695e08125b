//! Passports: signed capability assertions
//!
//! A passport binds an agent identifier to a capability list, signed by the
//! key the identifier itself encodes. The signature covers the canonical
//! JSON of the record with the `signature` field removed, so any mutation
//! of a signed field is detectable.

use convoy_core::{canonical_json, time, Aid, KeyPair, Signature};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A signed, optionally time-bounded capability assertion.
///
/// Wire form (compact JSON, camelCase):
/// `{did, publicKey, capabilities, issuedAt, expiresAt?, signature}`.
/// Unknown fields are rejected on deserialize: an extra field would change
/// the signed byte image without being covered by the signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Passport {
    pub did: Aid,
    /// Lowercase hex of the 32-byte public key; must match `did`.
    pub public_key: String,
    pub capabilities: Vec<String>,
    /// Unix seconds.
    pub issued_at: u64,
    /// Unix seconds; when present, must be after `issued_at`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Lowercase hex of the 64-byte Ed25519 signature.
    pub signature: String,
}

/// Options for [`Passport::issue`].
#[derive(Clone, Debug, Default)]
pub struct IssueOptions {
    /// Lifetime in seconds; `None` issues a passport with no expiry.
    pub ttl_seconds: Option<u64>,
}

/// Options for [`Passport::verify`].
#[derive(Clone, Debug, Default)]
pub struct VerifyOptions {
    /// Skip the expiry check.
    pub ignore_expiration: bool,
    /// Unix seconds to evaluate expiry against; defaults to the system clock.
    pub current_time: Option<u64>,
}

/// Per-passport outcome of [`verify_batch`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchVerdict {
    pub did: Aid,
    pub valid: bool,
}

impl Passport {
    /// Issue a passport for `keypair` asserting `capabilities`.
    ///
    /// An empty capability list is valid: it asserts an identity with no
    /// granted capabilities.
    pub fn issue(
        keypair: &KeyPair,
        capabilities: Vec<String>,
        options: &IssueOptions,
    ) -> Result<Self> {
        if options.ttl_seconds == Some(0) {
            return Err(Error::InvalidPassport(
                "ttl must be at least one second".to_string(),
            ));
        }
        let public_key = keypair.public_key();
        let issued_at = time::now_seconds();

        let mut passport = Self {
            did: Aid::from_public_key(&public_key),
            public_key: public_key.to_hex(),
            capabilities,
            issued_at,
            expires_at: options.ttl_seconds.map(|ttl| issued_at + ttl),
            signature: String::new(),
        };

        let message = passport.signed_image()?;
        passport.signature = keypair.sign(&message).to_hex();
        Ok(passport)
    }

    /// Verify this passport.
    ///
    /// Returns `true` iff the identifier is well-formed, the embedded public
    /// key matches it, the signature and key hex are canonical, the passport
    /// is not expired (unless ignored), and the signature verifies under the
    /// key the identifier encodes. Every failure mode returns `false`; no
    /// error escapes.
    pub fn verify(&self, options: &VerifyOptions) -> bool {
        let Ok(embedded_key) = self.did.public_key() else {
            return false;
        };

        if !is_lowercase_hex(&self.public_key, 64) {
            return false;
        }
        if self.public_key != embedded_key.to_hex() {
            return false;
        }
        if !is_lowercase_hex(&self.signature, 128) {
            return false;
        }

        if !options.ignore_expiration {
            if let Some(expires_at) = self.expires_at {
                let now = options.current_time.unwrap_or_else(time::now_seconds);
                if now >= expires_at {
                    return false;
                }
            }
        }

        let Ok(message) = self.signed_image() else {
            return false;
        };
        let Ok(signature) = Signature::from_hex(&self.signature) else {
            return false;
        };
        embedded_key.verify(&message, &signature)
    }

    /// Whether the passport has expired at `current_time` (system clock when
    /// `None`). A passport without `expiresAt` never expires.
    pub fn is_expired(&self, current_time: Option<u64>) -> bool {
        match self.expires_at {
            None => false,
            Some(expires_at) => current_time.unwrap_or_else(time::now_seconds) >= expires_at,
        }
    }

    /// Serialize to compact JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON, rejecting unknown fields and missing required ones.
    pub fn from_json(json: &str) -> Result<Self> {
        let passport: Self = serde_json::from_str(json)?;
        if let Some(expires_at) = passport.expires_at {
            if expires_at <= passport.issued_at {
                return Err(Error::InvalidPassport(
                    "expiresAt must be after issuedAt".to_string(),
                ));
            }
        }
        Ok(passport)
    }

    /// Canonical bytes of the record with `signature` removed: the exact
    /// pre-image that is signed and verified.
    pub(crate) fn signed_image(&self) -> Result<Vec<u8>> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("signature");
        }
        Ok(canonical_json(&value)?.into_bytes())
    }
}

/// Verify a batch of passports independently, in input order.
///
/// Verification is pure and shares no state, so callers may also fan this
/// out across tasks; the sequential form keeps result order obvious.
pub fn verify_batch(passports: &[Passport], options: &VerifyOptions) -> Vec<BatchVerdict> {
    passports
        .iter()
        .map(|p| BatchVerdict {
            did: p.did.clone(),
            valid: p.verify(options),
        })
        .collect()
}

fn is_lowercase_hex(s: &str, expected_len: usize) -> bool {
    s.len() == expected_len
        && s.bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(capabilities: &[&str], ttl: Option<u64>) -> (KeyPair, Passport) {
        let keypair = KeyPair::generate();
        let passport = Passport::issue(
            &keypair,
            capabilities.iter().map(|c| c.to_string()).collect(),
            &IssueOptions { ttl_seconds: ttl },
        )
        .unwrap();
        (keypair, passport)
    }

    #[test]
    fn issue_and_verify() {
        let (_keypair, passport) = issue(&["navigate", "perceive"], None);
        assert!(passport.verify(&VerifyOptions::default()));
        assert_eq!(passport.public_key.len(), 64);
        assert_eq!(passport.signature.len(), 128);
    }

    #[test]
    fn empty_capability_list_is_valid() {
        let (_keypair, passport) = issue(&[], None);
        assert!(passport.verify(&VerifyOptions::default()));
    }

    #[test]
    fn capability_tamper_fails_verification() {
        let (_keypair, mut passport) = issue(&["navigate", "perceive"], None);
        assert!(passport.verify(&VerifyOptions::default()));

        passport.capabilities.push("hack".to_string());
        assert!(!passport.verify(&VerifyOptions::default()));
    }

    #[test]
    fn every_signed_field_is_tamper_evident() {
        let (_keypair, passport) = issue(&["navigate"], Some(3600));

        let mut tampered = passport.clone();
        tampered.issued_at += 1;
        assert!(!tampered.verify(&VerifyOptions::default()));

        let mut tampered = passport.clone();
        tampered.expires_at = tampered.expires_at.map(|t| t + 9999);
        assert!(!tampered.verify(&VerifyOptions::default()));

        let mut tampered = passport.clone();
        let other = KeyPair::generate();
        tampered.did = Aid::from_public_key(&other.public_key());
        assert!(!tampered.verify(&VerifyOptions::default()));

        let mut tampered = passport.clone();
        tampered.capabilities.clear();
        assert!(!tampered.verify(&VerifyOptions::default()));
    }

    #[test]
    fn expiry_honors_injected_clock() {
        let (_keypair, passport) = issue(&["navigate"], Some(1));
        let issued = passport.issued_at;

        let fresh = VerifyOptions {
            current_time: Some(issued),
            ..Default::default()
        };
        assert!(passport.verify(&fresh));

        let late = VerifyOptions {
            current_time: Some(issued + 100),
            ..Default::default()
        };
        assert!(!passport.verify(&late));
        assert!(passport.is_expired(Some(issued + 100)));
        assert!(!passport.is_expired(Some(issued)));

        let ignored = VerifyOptions {
            current_time: Some(issued + 100),
            ignore_expiration: true,
        };
        assert!(passport.verify(&ignored));
    }

    #[test]
    fn zero_ttl_rejected() {
        let keypair = KeyPair::generate();
        let err = Passport::issue(
            &keypair,
            vec![],
            &IssueOptions {
                ttl_seconds: Some(0),
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("ttl"));
    }

    #[test]
    fn passport_without_expiry_never_expires() {
        let (_keypair, passport) = issue(&["navigate"], None);
        assert!(!passport.is_expired(Some(u64::MAX)));
    }

    #[test]
    fn json_round_trip_preserves_verification() {
        let (_keypair, passport) = issue(&["navigate"], Some(3600));
        let json = passport.to_json().unwrap();
        let restored = Passport::from_json(&json).unwrap();
        assert_eq!(restored, passport);
        assert!(restored.verify(&VerifyOptions {
            current_time: Some(passport.issued_at),
            ..Default::default()
        }));
    }

    #[test]
    fn unknown_fields_rejected() {
        let (_keypair, passport) = issue(&["navigate"], None);
        let mut value = serde_json::to_value(&passport).unwrap();
        value["extra"] = serde_json::json!("field");
        let json = serde_json::to_string(&value).unwrap();
        assert!(Passport::from_json(&json).is_err());
    }

    #[test]
    fn missing_required_fields_rejected() {
        assert!(Passport::from_json(r#"{"did":"did:key:z"}"#).is_err());
        // issuedAt must be a number
        let (_keypair, passport) = issue(&[], None);
        let mut value = serde_json::to_value(&passport).unwrap();
        value["issuedAt"] = serde_json::json!("1700000000");
        assert!(Passport::from_json(&serde_json::to_string(&value).unwrap()).is_err());
    }

    #[test]
    fn inverted_expiry_rejected_on_parse() {
        let (_keypair, passport) = issue(&[], None);
        let mut value = serde_json::to_value(&passport).unwrap();
        value["expiresAt"] = serde_json::json!(passport.issued_at);
        assert!(Passport::from_json(&serde_json::to_string(&value).unwrap()).is_err());
    }

    #[test]
    fn signature_hex_must_be_lowercase() {
        let (_keypair, mut passport) = issue(&["navigate"], None);
        passport.signature = passport.signature.to_uppercase();
        assert!(!passport.verify(&VerifyOptions::default()));
    }

    #[test]
    fn wrong_embedded_key_fails() {
        let (_keypair, mut passport) = issue(&["navigate"], None);
        let other = KeyPair::generate();
        passport.public_key = other.public_key().to_hex();
        assert!(!passport.verify(&VerifyOptions::default()));
    }

    #[test]
    fn batch_preserves_input_order() {
        let (_a_kp, a) = issue(&["navigate"], None);
        let (_b_kp, mut b) = issue(&["perceive"], None);
        b.capabilities.push("hack".to_string());
        let (_c_kp, c) = issue(&[], None);

        let verdicts = verify_batch(&[a.clone(), b.clone(), c.clone()], &VerifyOptions::default());
        assert_eq!(verdicts.len(), 3);
        assert_eq!(verdicts[0].did, a.did);
        assert!(verdicts[0].valid);
        assert_eq!(verdicts[1].did, b.did);
        assert!(!verdicts[1].valid);
        assert_eq!(verdicts[2].did, c.did);
        assert!(verdicts[2].valid);
    }
}
