//! # Message Signer
//!
//! HMAC-SHA256 over a canonical JSON encoding of a [`SyncMessage`].
//!
//! ## Canonical Form
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  message ──► serde_json::Value ──► keys sorted (recursively)            │
//! │                                         │                               │
//! │                                         ▼                               │
//! │                                compact JSON text                        │
//! │                                         │                               │
//! │                                         ▼                               │
//! │                        HMAC-SHA256(shared_secret, text)                 │
//! │                                         │                               │
//! │                                         ▼                               │
//! │                              lowercase hex signature                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Verification recomputes the MAC and compares with
//! [`Mac::verify_slice`], which is constant-time.

use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use std::fmt;

use crate::error::{SyncError, SyncResult};
use crate::protocol::{now_epoch, SignedEnvelope, SyncMessage};

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies envelopes with a shared secret.
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("key", &"<redacted>").finish()
    }
}

impl Signer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Signer {
            key: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> SyncResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| SyncError::Internal(e.to_string()))
    }

    /// Signs `message`, stamping the envelope with the current time.
    pub fn sign(&self, message: SyncMessage) -> SyncResult<SignedEnvelope> {
        let canonical = canonical_json(&serde_json::to_value(&message)?);

        let mut mac = self.mac()?;
        mac.update(canonical.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(SignedEnvelope {
            message,
            signature,
            timestamp: now_epoch(),
        })
    }

    /// True if the envelope's signature matches its message.
    pub fn verify(&self, envelope: &SignedEnvelope) -> bool {
        match serde_json::to_value(&envelope.message) {
            Ok(value) => self.verify_canonical(&canonical_json(&value), &envelope.signature),
            Err(_) => false,
        }
    }

    /// Verifies an envelope in its raw JSON form, before it is decoded.
    ///
    /// Returns false (never panics) when the value is not an object, or
    /// `message` / `signature` is missing, empty or of the wrong type.
    pub fn verify_value(&self, envelope: &Value) -> bool {
        let Some(object) = envelope.as_object() else {
            return false;
        };

        let message = match object.get("message") {
            Some(message @ Value::Object(fields)) if !fields.is_empty() => message,
            _ => return false,
        };

        let signature = match object.get("signature").and_then(Value::as_str) {
            Some(signature) if !signature.is_empty() => signature,
            _ => return false,
        };

        self.verify_canonical(&canonical_json(message), signature)
    }

    /// Parses, verifies and decodes a raw envelope from the peer.
    ///
    /// ## Errors
    /// `MalformedMessage` if the text is not JSON or does not decode into a
    /// known message; `AuthFailure` if the signature does not match.
    pub fn open(&self, raw: &str) -> SyncResult<SignedEnvelope> {
        let value = SignedEnvelope::parse_raw(raw)?;
        if !self.verify_value(&value) {
            return Err(SyncError::AuthFailure(
                "signature missing or does not match".into(),
            ));
        }
        SignedEnvelope::from_value(value)
    }

    fn verify_canonical(&self, canonical: &str, signature_hex: &str) -> bool {
        let Ok(expected) = hex::decode(signature_hex) else {
            return false;
        };

        let Ok(mut mac) = self.mac() else {
            return false;
        };
        mac.update(canonical.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

// =============================================================================
// Canonical Encoding
// =============================================================================

/// Compact JSON with object keys sorted at every depth.
///
/// Sorting is done here rather than relied upon from `serde_json::Map`,
/// whose iteration order depends on the `preserve_order` feature.
pub fn canonical_json(value: &Value) -> String {
    sorted(value).to_string()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();

            let mut out = Map::with_capacity(fields.len());
            for key in keys {
                out.insert(key.clone(), sorted(&fields[key.as_str()]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use sibling_core::{ConceptRecord, MetricsSnapshot};

    fn concept_message() -> SyncMessage {
        SyncMessage::ConceptSync {
            timestamp: 1_700_000_000,
            source: "alpha".into(),
            concepts: vec![
                ConceptRecord::new("ownership", "topic", 10)
                    .with_confidence(0.9)
                    .with_meta(serde_json::json!({"z": 1, "a": [true, null]}))
                    .with_embedding(vec![0.1, -2.5, 3.333]),
                ConceptRecord::new("borrowing", "topic", 11),
            ],
        }
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let signer = Signer::new("shared");
        let envelope = signer.sign(concept_message()).unwrap();

        assert_eq!(envelope.signature.len(), 64);
        assert!(envelope
            .signature
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(signer.verify(&envelope));
    }

    #[test]
    fn test_verify_survives_the_wire() {
        let signer = Signer::new("shared");
        let envelope = signer.sign(concept_message()).unwrap();

        let raw = envelope.to_wire().unwrap();
        let value = SignedEnvelope::parse_raw(&raw).unwrap();
        assert!(signer.verify_value(&value));

        let decoded = SignedEnvelope::from_value(value).unwrap();
        assert!(signer.verify(&decoded));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let envelope = Signer::new("one").sign(concept_message()).unwrap();
        assert!(!Signer::new("two").verify(&envelope));
    }

    #[test]
    fn test_tampered_message_rejected() {
        let signer = Signer::new("shared");
        let envelope = signer.sign(concept_message()).unwrap();
        let raw = envelope.to_wire().unwrap();

        // Flip one byte inside the message body
        let idx = raw.find("ownership").unwrap();
        let mut bytes = raw.into_bytes();
        bytes[idx] = b'O';
        let tampered: Value = serde_json::from_slice(&bytes).unwrap();

        assert!(!signer.verify_value(&tampered));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let signer = Signer::new("shared");
        let mut envelope = signer.sign(concept_message()).unwrap();

        let first = envelope.signature.remove(0);
        let replacement = if first == '0' { '1' } else { '0' };
        envelope.signature.insert(0, replacement);

        assert!(!signer.verify(&envelope));
    }

    #[test]
    fn test_every_message_byte_matters() {
        let signer = Signer::new("shared");
        let message = SyncMessage::MetricsSync {
            timestamp: 5,
            source: "ab".into(),
            metrics: MetricsSnapshot::new().with("cpu_usage", 0.25),
        };
        let envelope = signer.sign(message).unwrap();
        let mut value = serde_json::to_value(&envelope).unwrap();
        assert!(signer.verify_value(&value));

        value["message"]["timestamp"] = serde_json::json!(6);
        assert!(!signer.verify_value(&value));

        value["message"]["timestamp"] = serde_json::json!(5);
        value["message"]["metrics"]["cpu_usage"] = serde_json::json!(0.26);
        assert!(!signer.verify_value(&value));
    }

    #[test]
    fn test_malformed_input_is_false() {
        let signer = Signer::new("shared");
        assert!(!signer.verify_value(&serde_json::json!("text")));
        assert!(!signer.verify_value(&serde_json::json!({})));
        assert!(!signer.verify_value(&serde_json::json!({"message": {}, "signature": "00"})));
        assert!(!signer.verify_value(&serde_json::json!({"message": {"type": "x"}})));
        assert!(!signer.verify_value(
            &serde_json::json!({"message": {"type": "x"}, "signature": "not-hex"})
        ));
        assert!(!signer.verify_value(&serde_json::json!({"message": {"type": "x"}, "signature": 7})));
    }

    #[test]
    fn test_open_classifies_failures() {
        let signer = Signer::new("pair");
        let wire = signer
            .sign(SyncMessage::metrics_sync("alpha", MetricsSnapshot::baseline()))
            .unwrap()
            .to_wire()
            .unwrap();

        let opened = signer.open(&wire).unwrap();
        assert_eq!(opened.message.source(), "alpha");

        let err = Signer::new("other").open(&wire).unwrap_err();
        assert!(matches!(err, SyncError::AuthFailure(_)));
        assert!(err.is_protocol_error());

        assert!(matches!(
            signer.open("{not json").unwrap_err(),
            SyncError::MalformedMessage(_)
        ));
    }

    #[test]
    fn test_canonical_sorts_nested_keys() {
        let value = serde_json::json!({"b": {"d": 1, "c": 2}, "a": [{"y": 1, "x": 2}]});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":[{"x":2,"y":1}],"b":{"c":2,"d":1}}"#
        );
    }

    #[test]
    fn test_debug_redacts_key() {
        let debug = format!("{:?}", Signer::new("hunter2"));
        assert!(!debug.contains("hunter2"));
    }
}
