//! Self-certifying agent identifiers
//!
//! An AID is a `did:key` string: the multicodec Ed25519 prefix `0xED 0x01`
//! followed by the 32-byte public key, base58btc-encoded with the `z`
//! multibase marker. The identifier carries its own verifier, so a peer can
//! check signatures without any lookup.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::keys::PublicKey;

const DID_KEY_PREFIX: &str = "did:key:";
const MULTIBASE_BASE58BTC: char = 'z';
const MULTICODEC_ED25519_PUB: [u8; 2] = [0xED, 0x01];
const MIN_AID_LEN: usize = 48;

/// Agent identifier of the form `did:key:z<base58btc>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Aid(String);

/// Structured view of a parsed AID.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedAid {
    /// DID method; only `key` is supported.
    pub method: String,
    /// Public key embedded in the identifier.
    pub public_key: PublicKey,
}

impl Aid {
    /// Derive the identifier for a public key.
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let mut payload = Vec::with_capacity(2 + 32);
        payload.extend_from_slice(&MULTICODEC_ED25519_PUB);
        payload.extend_from_slice(public_key.as_bytes());
        Self(format!(
            "{DID_KEY_PREFIX}{MULTIBASE_BASE58BTC}{}",
            bs58::encode(payload).into_string()
        ))
    }

    /// Parse and validate an identifier string.
    pub fn parse(s: &str) -> Result<Self> {
        decode_aid(s)?;
        Ok(Self(s.to_string()))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// DID method of this identifier.
    pub fn method(&self) -> &str {
        "key"
    }

    /// Extract the public key embedded in the identifier.
    pub fn public_key(&self) -> Result<PublicKey> {
        decode_aid(&self.0)
    }
}

impl std::fmt::Display for Aid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Aid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parse an AID string into its method and public key.
pub fn parse_aid(s: &str) -> Result<ParsedAid> {
    let public_key = decode_aid(s)?;
    Ok(ParsedAid {
        method: "key".to_string(),
        public_key,
    })
}

/// Total predicate: true iff `s` is a well-formed AID.
pub fn is_valid_aid(s: &str) -> bool {
    decode_aid(s).is_ok()
}

fn decode_aid(s: &str) -> Result<PublicKey> {
    let rest = match s.strip_prefix(DID_KEY_PREFIX) {
        Some(rest) => rest,
        None => {
            // A DID with a different method is recognizable but unsupported.
            if let Some(tail) = s.strip_prefix("did:") {
                if tail.contains(':') {
                    return Err(Error::InvalidAid(format!(
                        "unsupported DID method in {s:?}"
                    )));
                }
            }
            return Err(Error::InvalidAid(format!("missing did:key prefix in {s:?}")));
        }
    };

    if s.len() < MIN_AID_LEN {
        return Err(Error::InvalidAid(format!(
            "identifier too short: {} chars",
            s.len()
        )));
    }

    let encoded = rest
        .strip_prefix(MULTIBASE_BASE58BTC)
        .ok_or_else(|| Error::InvalidAid("missing base58btc multibase marker".to_string()))?;
    if encoded.is_empty() {
        return Err(Error::InvalidAid("empty multibase payload".to_string()));
    }

    let payload = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| Error::InvalidAid(format!("invalid base58: {e}")))?;

    let key_bytes = payload
        .strip_prefix(&MULTICODEC_ED25519_PUB[..])
        .ok_or_else(|| Error::InvalidAid("missing ed25519 multicodec prefix".to_string()))?;

    let key_bytes: [u8; 32] = key_bytes.try_into().map_err(|_| {
        Error::InvalidAid(format!(
            "expected 32 key bytes, got {}",
            payload.len().saturating_sub(2)
        ))
    })?;

    PublicKey::from_bytes(&key_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;

    #[test]
    fn round_trip() {
        let keypair = KeyPair::generate();
        let aid = Aid::from_public_key(&keypair.public_key());

        assert!(aid.as_str().starts_with("did:key:z"));
        assert!(aid.as_str().len() >= MIN_AID_LEN);
        assert_eq!(aid.public_key().unwrap(), keypair.public_key());
    }

    #[test]
    fn known_vector_round_trips() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x3b;
        bytes[1] = 0x6a;
        for (i, b) in bytes.iter_mut().enumerate().skip(2) {
            *b = i as u8;
        }
        // Build via a real keypair so the bytes are a valid curve point.
        let keypair = KeyPair::from_seed(&bytes).unwrap();
        let pk = keypair.public_key();

        let aid = Aid::from_public_key(&pk);
        let tail = &aid.as_str()["did:key:".len()..];
        assert!(tail.starts_with('z'));
        assert!(tail[1..]
            .chars()
            .all(|c| "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz".contains(c)));
        assert_eq!(aid.public_key().unwrap(), pk);
    }

    #[test]
    fn parse_reports_key_method() {
        let keypair = KeyPair::generate();
        let aid = Aid::from_public_key(&keypair.public_key());
        let parsed = parse_aid(aid.as_str()).unwrap();
        assert_eq!(parsed.method, "key");
        assert_eq!(parsed.public_key, keypair.public_key());
    }

    #[test]
    fn other_did_methods_rejected() {
        let err = Aid::parse("did:web:example.com:agents:rover-7").unwrap_err();
        assert!(err.to_string().contains("unsupported DID method"));
    }

    #[test]
    fn malformed_inputs_rejected() {
        assert!(!is_valid_aid(""));
        assert!(!is_valid_aid("did:key:"));
        assert!(!is_valid_aid("did:key:z"));
        assert!(!is_valid_aid("not-a-did"));
        // 0, O, I, l are outside the base58 alphabet
        assert!(!is_valid_aid(
            "did:key:z0OIl0OIl0OIl0OIl0OIl0OIl0OIl0OIl0OIl0OIl0OIl"
        ));
    }

    #[test]
    fn truncated_payload_rejected() {
        let keypair = KeyPair::generate();
        let aid = Aid::from_public_key(&keypair.public_key());
        let truncated: String = aid.as_str().chars().take(aid.as_str().len() - 4).collect();
        assert!(!is_valid_aid(&truncated));
    }

    #[test]
    fn wrong_multicodec_rejected() {
        // secp256k1 multicodec prefix (0xe7 0x01) instead of ed25519
        let mut payload = vec![0xe7, 0x01];
        payload.extend_from_slice(&[5u8; 32]);
        let s = format!("did:key:z{}", bs58::encode(payload).into_string());
        assert!(!is_valid_aid(&s));
    }

    #[test]
    fn serde_is_transparent() {
        let keypair = KeyPair::generate();
        let aid = Aid::from_public_key(&keypair.public_key());
        let json = serde_json::to_string(&aid).unwrap();
        assert_eq!(json, format!("\"{}\"", aid.as_str()));
        let back: Aid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, aid);
    }
}
