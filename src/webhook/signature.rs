//! Webhook signature scheme
//!
//! HMAC-SHA256 over the canonical JSON encoding of the payload: keys
//! sorted, no whitespace, `signature` field excluded. Verification uses a
//! constant-time comparison via `Mac::verify_slice`.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Canonical encoding the signature is computed over. serde_json's default
/// object map is a BTreeMap, so serializing a rebuilt object yields sorted
/// keys; `to_string` emits no whitespace.
pub fn canonical_payload(payload: &Value) -> Option<String> {
    let mut object = payload.as_object()?.clone();
    object.remove("signature");
    serde_json::to_string(&Value::Object(object)).ok()
}

/// Hex-encoded HMAC-SHA256 signature for a canonical payload string.
pub fn sign(secret: &str, canonical: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify the hex signature carried in the payload's `signature` field.
/// Returns false for malformed payloads rather than erroring.
pub fn verify(secret: &str, payload: &Value) -> bool {
    let Some(signature_hex) = payload.get("signature").and_then(Value::as_str) else {
        return false;
    };
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let Some(canonical) = canonical_payload(payload) else {
        return false;
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(canonical.as_bytes());
    mac.verify_slice(&signature).is_ok()
}

/// Attach a valid signature to a payload (testing and the signature
/// generation utility).
pub fn attach_signature(secret: &str, payload: &mut Value) {
    if let Some(canonical) = canonical_payload(payload)
        && let Some(object) = payload.as_object_mut()
    {
        let signature = sign(secret, &canonical);
        object.insert("signature".to_string(), Value::String(signature));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "test-webhook-secret";

    #[test]
    fn test_canonical_sorts_keys_and_strips_signature() {
        let payload = json!({
            "status": "success",
            "transaction_id": "abc",
            "bank_reference": "DEP-X",
            "signature": "deadbeef"
        });
        let canonical = canonical_payload(&payload).unwrap();
        assert_eq!(
            canonical,
            r#"{"bank_reference":"DEP-X","status":"success","transaction_id":"abc"}"#
        );
    }

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let mut payload = json!({
            "transaction_id": "abc",
            "bank_reference": "DEP-X",
            "status": "success"
        });
        attach_signature(SECRET, &mut payload);
        assert!(verify(SECRET, &payload));
    }

    #[test]
    fn test_whitespace_and_key_order_do_not_matter() {
        // Two encodings of the same logical payload share a signature
        let a = canonical_payload(&json!({"b": 1, "a": 2})).unwrap();
        let b = canonical_payload(&json!({"a": 2, "b": 1})).unwrap();
        assert_eq!(a, b);
        assert_eq!(sign(SECRET, &a), sign(SECRET, &b));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let mut payload = json!({"transaction_id": "abc", "status": "success"});
        attach_signature(SECRET, &mut payload);

        payload["status"] = json!("failed");
        assert!(!verify(SECRET, &payload));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let mut payload = json!({"transaction_id": "abc", "status": "success"});
        attach_signature("other-secret", &mut payload);
        assert!(!verify(SECRET, &payload));
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        // Missing signature
        assert!(!verify(SECRET, &json!({"a": 1})));
        // Non-hex signature
        assert!(!verify(SECRET, &json!({"a": 1, "signature": "zzzz"})));
        // Not an object
        assert!(!verify(SECRET, &json!([1, 2, 3])));
    }
}
