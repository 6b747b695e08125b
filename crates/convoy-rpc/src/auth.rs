//! Request signing and verification
//!
//! The default policy signs the canonical JSON of `{method, params}`: the
//! signature stays valid across idempotent retries, which reuse the payload
//! with a fresh request id. The full-request policy instead covers the
//! whole envelope minus `auth.signature`, for peers that sign that way.
//! The two are incompatible on the wire, so the policy is explicit on both
//! ends rather than silently assumed.

use convoy_core::{signing_bytes, KeyPair, Signature};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::Request;
use crate::error::Result;

/// What the request signature covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignaturePolicy {
    /// Canonical `{method, params}` (params omitted when absent).
    #[default]
    PayloadOnly,
    /// Canonical full request with `auth.signature` removed.
    FullRequest,
}

/// The value covered by a payload-only signature.
pub(crate) fn payload_value(method: &str, params: Option<&Value>) -> Value {
    let mut map = Map::new();
    map.insert("method".to_string(), Value::String(method.to_string()));
    if let Some(params) = params {
        map.insert("params".to_string(), params.clone());
    }
    Value::Object(map)
}

/// Sign `{method, params}` with the caller's key; returns hex.
pub fn sign_payload(keypair: &KeyPair, method: &str, params: Option<&Value>) -> Result<String> {
    let message = signing_bytes(&payload_value(method, params))?;
    Ok(keypair.sign(&message).to_hex())
}

/// Sign a complete request (which must already carry `auth.from`) under the
/// full-request policy; returns hex.
pub fn sign_full_request(keypair: &KeyPair, request: &Request) -> Result<String> {
    let message = full_request_image(request)?;
    Ok(keypair.sign(&message).to_hex())
}

fn full_request_image(request: &Request) -> Result<Vec<u8>> {
    let mut value = serde_json::to_value(request)?;
    if let Some(auth) = value.get_mut("auth").and_then(Value::as_object_mut) {
        auth.remove("signature");
    }
    Ok(signing_bytes(&value)?)
}

/// Verify a request's `auth` block under the given policy.
///
/// The verifying key comes from `auth.from` itself; no lookup. Any
/// malformed input returns `false`; no error escapes.
pub fn verify_request(request: &Request, policy: SignaturePolicy) -> bool {
    let Some(auth) = &request.auth else {
        return false;
    };
    let Ok(public_key) = auth.from.public_key() else {
        return false;
    };
    let Ok(signature) = Signature::from_hex(&auth.signature) else {
        return false;
    };

    let message = match policy {
        SignaturePolicy::PayloadOnly => {
            signing_bytes(&payload_value(&request.method, request.params.as_ref()))
                .map_err(crate::error::Error::from)
        }
        SignaturePolicy::FullRequest => full_request_image(request),
    };
    let Ok(message) = message else {
        return false;
    };

    public_key.verify(&message, &signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Auth;
    use convoy_core::Aid;

    fn signed_request(keypair: &KeyPair, method: &str, params: Option<Value>) -> Request {
        let signature = sign_payload(keypair, method, params.as_ref()).unwrap();
        let mut request = Request::new("req-1-0", method, params);
        request.auth = Some(Auth {
            from: Aid::from_public_key(&keypair.public_key()),
            signature,
        });
        request
    }

    #[test]
    fn payload_signature_verifies() {
        let keypair = KeyPair::generate();
        let request = signed_request(&keypair, "echo", Some(serde_json::json!({"hello": "world"})));
        assert!(verify_request(&request, SignaturePolicy::PayloadOnly));
    }

    #[test]
    fn payload_signature_survives_id_change() {
        let keypair = KeyPair::generate();
        let mut request = signed_request(&keypair, "echo", Some(serde_json::json!(1)));
        // An idempotent retry reuses the signature with a fresh id.
        request.id = "req-2-99".into();
        assert!(verify_request(&request, SignaturePolicy::PayloadOnly));
    }

    #[test]
    fn tampered_params_rejected() {
        let keypair = KeyPair::generate();
        let mut request = signed_request(&keypair, "echo", Some(serde_json::json!({"v": 1})));
        request.params = Some(serde_json::json!({"v": 2}));
        assert!(!verify_request(&request, SignaturePolicy::PayloadOnly));
    }

    #[test]
    fn tampered_method_rejected() {
        let keypair = KeyPair::generate();
        let mut request = signed_request(&keypair, "echo", None);
        request.method = "shutdown".to_string();
        assert!(!verify_request(&request, SignaturePolicy::PayloadOnly));
    }

    #[test]
    fn wrong_claimed_identity_rejected() {
        let keypair = KeyPair::generate();
        let impostor = KeyPair::generate();
        let mut request = signed_request(&keypair, "echo", None);
        if let Some(auth) = &mut request.auth {
            auth.from = Aid::from_public_key(&impostor.public_key());
        }
        assert!(!verify_request(&request, SignaturePolicy::PayloadOnly));
    }

    #[test]
    fn full_request_policy_round_trips() {
        let keypair = KeyPair::generate();
        let mut request = Request::new("req-1-0", "echo", Some(serde_json::json!({"a": 1})));
        request.auth = Some(Auth {
            from: Aid::from_public_key(&keypair.public_key()),
            signature: String::new(),
        });
        let signature = sign_full_request(&keypair, &request).unwrap();
        if let Some(auth) = &mut request.auth {
            auth.signature = signature;
        }

        assert!(verify_request(&request, SignaturePolicy::FullRequest));
        // The two policies are not interchangeable.
        assert!(!verify_request(&request, SignaturePolicy::PayloadOnly));

        // Under full-request coverage, changing the id invalidates.
        request.id = "req-2-0".into();
        assert!(!verify_request(&request, SignaturePolicy::FullRequest));
    }

    #[test]
    fn missing_auth_rejected() {
        let request = Request::new("req-1-0", "echo", None);
        assert!(!verify_request(&request, SignaturePolicy::PayloadOnly));
    }

    #[test]
    fn garbage_signature_rejected() {
        let keypair = KeyPair::generate();
        let mut request = signed_request(&keypair, "echo", None);
        if let Some(auth) = &mut request.auth {
            auth.signature = "feed".repeat(3);
        }
        assert!(!verify_request(&request, SignaturePolicy::PayloadOnly));
    }
}
