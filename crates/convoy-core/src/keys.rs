//! Ed25519 key pairs, signing, and verification
//!
//! Private key bytes are secrets: seed buffers are zeroized as soon as the
//! signing key has been constructed, and nothing in this module logs or
//! debug-prints key material.

use ed25519_dalek::{
    Signature as DalekSignature, Signer as DalekSigner, SigningKey, Verifier, VerifyingKey,
};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Ed25519 key pair held by one agent identity.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new key pair from OS randomness.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore a key pair from a 32-byte seed.
    ///
    /// An all-zero seed is rejected: it is the conventional "unset" value
    /// and never a real key.
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self> {
        if seed.iter().all(|b| *b == 0) {
            return Err(Error::InvalidPrivateKey("seed is all zeroes".to_string()));
        }
        Ok(Self {
            signing_key: SigningKey::from_bytes(seed),
        })
    }

    /// Restore a key pair from a hex-encoded seed.
    pub fn from_hex(hex_seed: &str) -> Result<Self> {
        let mut bytes = hex::decode(hex_seed).map_err(|e| Error::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            bytes.zeroize();
            return Err(Error::InvalidPrivateKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }

        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes);
        bytes.zeroize();

        let result = Self::from_seed(&seed);
        seed.zeroize();
        result
    }

    /// The public half of this key pair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Sign a message with the private key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            inner: self.signing_key.sign(message),
        }
    }

    /// Export the seed as lowercase hex. Handle with care.
    pub fn to_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose the seed through Debug.
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key().to_hex())
            .finish_non_exhaustive()
    }
}

/// Derive the public key from raw private-key bytes.
pub fn derive_public(private_key: &[u8]) -> Result<PublicKey> {
    if private_key.len() != 32 {
        return Err(Error::InvalidPrivateKey(format!(
            "expected 32 bytes, got {}",
            private_key.len()
        )));
    }
    let mut seed = [0u8; 32];
    seed.copy_from_slice(private_key);
    let keypair = KeyPair::from_seed(&seed);
    seed.zeroize();
    Ok(keypair?.public_key())
}

/// True iff `bytes` could be a convoy private key: 32 bytes, not all zero.
pub fn is_valid_private_key(bytes: &[u8]) -> bool {
    bytes.len() == 32 && bytes.iter().any(|b| *b != 0)
}

/// True iff `bytes` could be a convoy public key: 32 bytes, not all zero.
pub fn is_valid_public_key(bytes: &[u8]) -> bool {
    bytes.len() == 32 && bytes.iter().any(|b| *b != 0)
}

/// Ed25519 public key used for verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKey {
    #[serde(with = "pubkey_serde")]
    verifying_key: VerifyingKey,
}

mod pubkey_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(key: &VerifyingKey, s: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&hex::encode(key.to_bytes()))
    }

    pub fn deserialize<'de, D>(d: D) -> std::result::Result<VerifyingKey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex_str = String::deserialize(d)?;
        let bytes = hex::decode(&hex_str).map_err(serde::de::Error::custom)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("public key must be 32 bytes"))?;
        VerifyingKey::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl PublicKey {
    /// Create from raw bytes (32 bytes).
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key =
            VerifyingKey::from_bytes(bytes).map_err(|e| Error::InvalidPublicKey(e.to_string()))?;
        Ok(Self { verifying_key })
    }

    /// Create from hex-encoded bytes.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str).map_err(|e| Error::InvalidHex(e.to_string()))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            Error::InvalidPublicKey(format!("expected 32 bytes, got {}", v.len()))
        })?;
        Self::from_bytes(&bytes)
    }

    /// Verify a signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.verifying_key.verify(message, &signature.inner).is_ok()
    }

    /// Export as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.verifying_key.to_bytes())
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.verifying_key.as_bytes()
    }
}

/// Ed25519 signature (64 bytes on the wire, hex-encoded).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature {
    #[serde(with = "sig_serde")]
    inner: DalekSignature,
}

mod sig_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(sig: &DalekSignature, s: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&hex::encode(sig.to_bytes()))
    }

    pub fn deserialize<'de, D>(d: D) -> std::result::Result<DalekSignature, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex_str = String::deserialize(d)?;
        let bytes = hex::decode(&hex_str).map_err(serde::de::Error::custom)?;
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be 64 bytes"))?;
        Ok(DalekSignature::from_bytes(&bytes))
    }
}

impl Signature {
    /// Create from raw bytes (64 bytes).
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self {
            inner: DalekSignature::from_bytes(bytes),
        }
    }

    /// Create from hex-encoded bytes.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str).map_err(|e| Error::InvalidHex(e.to_string()))?;
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| Error::InvalidSignature)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Export as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.inner.to_bytes())
    }

    /// Raw signature bytes.
    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let keypair = KeyPair::generate();
        let signature = keypair.sign(b"hello convoy");
        assert!(keypair.public_key().verify(b"hello convoy", &signature));
        assert!(!keypair.public_key().verify(b"tampered", &signature));
    }

    #[test]
    fn same_seed_same_key() {
        let seed = [7u8; 32];
        let a = KeyPair::from_seed(&seed).unwrap();
        let b = KeyPair::from_seed(&seed).unwrap();
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn all_zero_seed_rejected() {
        assert!(KeyPair::from_seed(&[0u8; 32]).is_err());
        assert!(KeyPair::from_hex(&"00".repeat(32)).is_err());
    }

    #[test]
    fn hex_round_trip() {
        let keypair = KeyPair::generate();
        let restored = KeyPair::from_hex(&keypair.to_hex()).unwrap();
        assert_eq!(keypair.public_key(), restored.public_key());

        let pk_hex = keypair.public_key().to_hex();
        assert_eq!(PublicKey::from_hex(&pk_hex).unwrap(), keypair.public_key());
    }

    #[test]
    fn signature_hex_round_trip() {
        let keypair = KeyPair::generate();
        let signature = keypair.sign(b"msg");
        let restored = Signature::from_hex(&signature.to_hex()).unwrap();
        assert_eq!(signature.to_bytes(), restored.to_bytes());
    }

    #[test]
    fn derive_public_matches_keypair() {
        let keypair = KeyPair::generate();
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&hex::decode(keypair.to_hex()).unwrap());
        let derived = derive_public(&seed).unwrap();
        assert_eq!(derived, keypair.public_key());
    }

    #[test]
    fn derive_public_rejects_bad_input() {
        assert!(derive_public(&[1u8; 16]).is_err());
        assert!(derive_public(&[0u8; 32]).is_err());
    }

    #[test]
    fn validity_predicates() {
        assert!(is_valid_private_key(&[9u8; 32]));
        assert!(!is_valid_private_key(&[0u8; 32]));
        assert!(!is_valid_private_key(&[9u8; 31]));
        assert!(is_valid_public_key(&[9u8; 32]));
        assert!(!is_valid_public_key(&[]));
    }

    #[test]
    fn debug_never_prints_seed() {
        let keypair = KeyPair::generate();
        let rendered = format!("{keypair:?}");
        assert!(!rendered.contains(&keypair.to_hex()));
    }

    #[test]
    fn serde_round_trip() {
        let keypair = KeyPair::generate();
        let pk_json = serde_json::to_string(&keypair.public_key()).unwrap();
        let sig_json = serde_json::to_string(&keypair.sign(b"x")).unwrap();

        let pk: PublicKey = serde_json::from_str(&pk_json).unwrap();
        let sig: Signature = serde_json::from_str(&sig_json).unwrap();
        assert_eq!(pk, keypair.public_key());
        assert!(pk.verify(b"x", &sig));
    }
}
