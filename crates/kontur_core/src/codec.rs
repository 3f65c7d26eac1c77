//! Packet codec.
//!
//! Canonical serialization + SHA-256 integrity digest, one packet per line.
//!
//! Canonical form of a payload:
//!   - compact JSON, no whitespace
//!   - object keys sorted by UTF-8 byte order, recursively
//!   - arrays keep their order
//!
//! Identical payloads always produce identical digests. Routers written in
//! other languages rely on this, so the rules above must not drift.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::ProtocolError;
use crate::packet::Packet;

/// Prefix written in front of the hex digest in `integrity`.
pub const INTEGRITY_PREFIX: &str = "sha256-";

/// Canonical JSON text of `value` (sorted keys, compact).
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA-256 of the canonical payload. Lowercase hex.
pub fn digest(payload: &Value) -> String {
    let hash = Sha256::digest(canonical_json(payload).as_bytes());
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Fill in `integrity` from the current payload.
pub fn seal(packet: &mut Packet) {
    packet.integrity = format!("{}{}", INTEGRITY_PREFIX, digest(&packet.payload));
}

/// Seal the packet and serialize it as a single line (no trailing newline).
///
/// `serde_json` escapes control characters inside strings, so the result never
/// contains an embedded newline.
pub fn encode(packet: &mut Packet) -> Result<String, ProtocolError> {
    seal(packet);
    serde_json::to_string(packet).map_err(ProtocolError::Encode)
}

/// Parse one line. Malformed input is an error value, never a panic.
pub fn decode(line: &str) -> Result<Packet, ProtocolError> {
    serde_json::from_str(line.trim_end_matches(['\r', '\n'])).map_err(ProtocolError::Decode)
}

/// Recompute the digest and compare it to `integrity`.
///
/// Accepts both `sha256-<hex>` and the bare hex form.
pub fn verify(packet: &Packet) -> bool {
    check_integrity(packet).is_ok()
}

/// Like [`verify`], but reports what was expected and what was computed.
pub fn check_integrity(packet: &Packet) -> Result<(), ProtocolError> {
    let expected = packet
        .integrity
        .strip_prefix(INTEGRITY_PREFIX)
        .unwrap_or(&packet.integrity);
    let computed = digest(&packet.payload);
    if expected.eq_ignore_ascii_case(&computed) {
        Ok(())
    } else {
        Err(ProtocolError::IntegrityMismatch {
            expected: packet.integrity.clone(),
            computed,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Intent;
    use serde_json::json;

    fn sample() -> Packet {
        Packet::new(
            "kontur://core/router",
            "kontur://organ/grisha",
            Intent::Query,
            "AUDIT",
            json!({"operation": "execute_code", "args": {"code": "print(1)"}}),
        )
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"z": [3, {"y": true, "x": null}], "c": "s"}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":"s","z":[3,{"x":null,"y":true}]},"b":1}"#
        );
    }

    #[test]
    fn test_digest_ignores_key_order() {
        let a = json!({"first": 1, "second": [1, 2]});
        let b = json!({"second": [1, 2], "first": 1});
        assert_eq!(digest(&a), digest(&b));
        assert_eq!(digest(&a).len(), 64);
    }

    #[test]
    fn test_digest_of_empty_object_is_stable() {
        // sha256("{}")
        assert_eq!(
            digest(&json!({})),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn test_encode_produces_single_verified_line() {
        let mut packet = sample();
        packet.payload["note"] = json!("line one\nline two");
        let line = encode(&mut packet).unwrap();
        assert!(!line.contains('\n'));
        assert!(packet.integrity.starts_with(INTEGRITY_PREFIX));

        let decoded = decode(&line).unwrap();
        assert!(verify(&decoded));
        assert_eq!(decoded.payload["note"], "line one\nline two");
    }

    #[test]
    fn test_verify_accepts_bare_hex() {
        let mut packet = sample();
        packet.integrity = digest(&packet.payload);
        assert!(verify(&packet));
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let mut packet = sample();
        let line = encode(&mut packet).unwrap();
        let mut decoded = decode(&line).unwrap();
        decoded.payload["operation"] = json!("delete_file");
        assert!(!verify(&decoded));
        assert!(matches!(
            check_integrity(&decoded),
            Err(ProtocolError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_integrity_does_not_verify() {
        let packet = sample();
        assert!(packet.integrity.is_empty());
        assert!(!verify(&packet));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode("{not json"), Err(ProtocolError::Decode(_))));
        assert!(matches!(decode(r#"{"id": "x"}"#), Err(ProtocolError::Decode(_))));
        assert!(decode("").is_err());
    }

    #[test]
    fn test_decode_tolerates_crlf() {
        let mut packet = sample();
        let line = format!("{}\r\n", encode(&mut packet).unwrap());
        assert!(decode(&line).is_ok());
    }
}
