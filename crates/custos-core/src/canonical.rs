//! Canonical encoding of audit entries and their payloads.
//!
//! Two layers are canonicalized:
//!
//! 1. **Payloads** (`before` / `after`) become canonical JSON: object keys
//!    sorted by byte order, no insignificant whitespace, integers in plain
//!    decimal, integral floats below 2^53 written as integers, remaining
//!    floats in shortest round-trip form, and `-0` written as `0`.
//! 2. **Entries** become a versioned, length-prefixed byte string. Field
//!    order is fixed by the schema, never by any collection's iteration order.
//!
//! Entry byte layout, format version 1:
//!
//! ```text
//! u64be(len) "custos.audit-entry"   domain tag
//! u8         0x01                   format version
//! per field, in this order:
//!   u8 tag, then the value
//!     0x01 tenant            optional text
//!     0x02 timestamp         i64be microseconds since the Unix epoch (UTC)
//!     0x03 actor             text
//!     0x04 action            text
//!     0x05 entity_type       text
//!     0x06 entity_id         optional text
//!     0x07 description       optional text
//!     0x08 before            optional text (canonical JSON)
//!     0x09 after             optional text (canonical JSON)
//!     0x0a origin.ip         text
//!     0x0b origin.user_agent text
//!     0x0c previous_hash     optional text
//! text          = u64be(byte length) UTF-8 bytes
//! optional text = 0x00 when absent, 0x01 text when present
//! ```
//!
//! `record` and `verify` both reach the digest through `encode_entry`, so a
//! stored entry is always re-encoded by the exact code that sealed it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Number, Value};

use custos_contracts::{
    entry::AuditEntry,
    error::{AuditError, AuditResult},
};

/// Version byte written after the domain tag.
pub const ENCODING_VERSION: u8 = 1;

/// Deepest payload nesting accepted before canonicalization is refused.
pub const MAX_PAYLOAD_DEPTH: usize = 64;

const DOMAIN_TAG: &[u8] = b"custos.audit-entry";

/// Largest float magnitude that is still written as an integer.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

mod tag {
    pub const TENANT: u8 = 0x01;
    pub const TIMESTAMP: u8 = 0x02;
    pub const ACTOR: u8 = 0x03;
    pub const ACTION: u8 = 0x04;
    pub const ENTITY_TYPE: u8 = 0x05;
    pub const ENTITY_ID: u8 = 0x06;
    pub const DESCRIPTION: u8 = 0x07;
    pub const BEFORE: u8 = 0x08;
    pub const AFTER: u8 = 0x09;
    pub const ORIGIN_IP: u8 = 0x0a;
    pub const ORIGIN_USER_AGENT: u8 = 0x0b;
    pub const PREVIOUS_HASH: u8 = 0x0c;
}

/// Borrowed view of every field that contributes to an entry's digest.
#[derive(Debug, Clone, Copy)]
pub struct EntryFields<'a> {
    pub tenant: Option<&'a str>,
    pub timestamp: DateTime<Utc>,
    pub actor: &'a str,
    pub action: &'a str,
    pub entity_type: &'a str,
    pub entity_id: Option<&'a str>,
    pub description: Option<&'a str>,
    pub before: Option<&'a str>,
    pub after: Option<&'a str>,
    pub origin_ip: &'a str,
    pub origin_user_agent: &'a str,
    pub previous_hash: Option<&'a str>,
}

impl<'a> EntryFields<'a> {
    /// View the stored fields of a committed entry.
    pub fn of(entry: &'a AuditEntry) -> Self {
        Self {
            tenant: entry.tenant.as_deref(),
            timestamp: entry.timestamp,
            actor: &entry.actor,
            action: &entry.action,
            entity_type: &entry.entity_type,
            entity_id: entry.entity_id.as_deref(),
            description: entry.description.as_deref(),
            before: entry.before.as_deref(),
            after: entry.after.as_deref(),
            origin_ip: &entry.origin.ip,
            origin_user_agent: &entry.origin.user_agent,
            previous_hash: entry.previous_hash.as_deref(),
        }
    }
}

/// Encode `fields` into the version-1 canonical byte string.
pub fn encode_entry(fields: &EntryFields<'_>) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);

    put_text(&mut out, DOMAIN_TAG);
    out.push(ENCODING_VERSION);

    put_optional(&mut out, tag::TENANT, fields.tenant);
    out.push(tag::TIMESTAMP);
    out.extend_from_slice(&fields.timestamp.timestamp_micros().to_be_bytes());
    put_required(&mut out, tag::ACTOR, fields.actor);
    put_required(&mut out, tag::ACTION, fields.action);
    put_required(&mut out, tag::ENTITY_TYPE, fields.entity_type);
    put_optional(&mut out, tag::ENTITY_ID, fields.entity_id);
    put_optional(&mut out, tag::DESCRIPTION, fields.description);
    put_optional(&mut out, tag::BEFORE, fields.before);
    put_optional(&mut out, tag::AFTER, fields.after);
    put_required(&mut out, tag::ORIGIN_IP, fields.origin_ip);
    put_required(&mut out, tag::ORIGIN_USER_AGENT, fields.origin_user_agent);
    put_optional(&mut out, tag::PREVIOUS_HASH, fields.previous_hash);

    out
}

fn put_text(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn put_required(out: &mut Vec<u8>, tag: u8, value: &str) {
    out.push(tag);
    put_text(out, value.as_bytes());
}

fn put_optional(out: &mut Vec<u8>, tag: u8, value: Option<&str>) {
    out.push(tag);
    match value {
        None => out.push(0x00),
        Some(v) => {
            out.push(0x01);
            put_text(out, v.as_bytes());
        }
    }
}

// ── Payload canonicalization ─────────────────────────────────────────────────

/// Canonicalize any serializable value into canonical JSON.
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> AuditResult<String> {
    let value = serde_json::to_value(value)?;
    canonical_json(&value)
}

/// Parse `raw` as JSON and re-emit it in canonical form.
pub fn canonicalize_str(raw: &str) -> AuditResult<String> {
    let value: Value = serde_json::from_str(raw)?;
    canonical_json(&value)
}

/// Render a JSON value in canonical form.
pub fn canonical_json(value: &Value) -> AuditResult<String> {
    let mut out = String::new();
    write_value(&mut out, value, 0)?;
    Ok(out)
}

fn write_value(out: &mut String, value: &Value, depth: usize) -> AuditResult<()> {
    if depth > MAX_PAYLOAD_DEPTH {
        return Err(AuditError::Serialization {
            reason: format!("payload nesting exceeds {MAX_PAYLOAD_DEPTH} levels"),
        });
    }

    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(out, n)?,
        Value::String(s) => write_string(out, s)?,
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item, depth + 1)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key)?;
                out.push(':');
                write_value(out, &map[key.as_str()], depth + 1)?;
            }
            out.push('}');
        }
    }

    Ok(())
}

fn write_string(out: &mut String, s: &str) -> AuditResult<()> {
    out.push_str(&serde_json::to_string(s)?);
    Ok(())
}

fn write_number(out: &mut String, n: &Number) -> AuditResult<()> {
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
    } else if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
    } else {
        let f = n.as_f64().ok_or_else(|| AuditError::Serialization {
            reason: format!("number {n} has no f64 representation"),
        })?;
        if !f.is_finite() {
            return Err(AuditError::Serialization {
                reason: "non-finite numbers cannot be canonicalized".to_string(),
            });
        }
        if f == 0.0 {
            out.push('0');
        } else if f.fract() == 0.0 && f.abs() < MAX_EXACT_INTEGER {
            out.push_str(&(f as i64).to_string());
        } else {
            out.push_str(&n.to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn fields() -> EntryFields<'static> {
        EntryFields {
            tenant: None,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            actor: "staff-7",
            action: "ClientCheckIn",
            entity_type: "Client",
            entity_id: Some("c-1"),
            description: None,
            before: None,
            after: Some(r#"{"status":"present"}"#),
            origin_ip: "10.0.0.4",
            origin_user_agent: "Kiosk/2.1",
            previous_hash: None,
        }
    }

    #[test]
    fn object_keys_are_sorted_regardless_of_insertion_order() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"z":true,"y":null}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"y":null,"z":true},"b":1}"#).unwrap();

        let ca = canonical_json(&a).unwrap();
        assert_eq!(ca, r#"{"a":{"y":null,"z":true},"b":1}"#);
        assert_eq!(ca, canonical_json(&b).unwrap());
    }

    #[test]
    fn numbers_have_one_spelling() {
        assert_eq!(canonical_json(&json!(1.0)).unwrap(), "1");
        assert_eq!(canonical_json(&json!(-0.0)).unwrap(), "0");
        assert_eq!(canonical_json(&json!(1.5)).unwrap(), "1.5");
        assert_eq!(canonical_json(&json!(-42)).unwrap(), "-42");
        assert_eq!(canonical_json(&json!(u64::MAX)).unwrap(), u64::MAX.to_string());
        assert_eq!(
            canonical_json(&json!([1, 1.0, 2.50])).unwrap(),
            canonical_json(&json!([1.0, 1, 2.5])).unwrap()
        );
    }

    #[test]
    fn strings_are_escaped_deterministically() {
        let v = json!({ "note": "line\nbreak \"quoted\" ü" });
        assert_eq!(
            canonical_json(&v).unwrap(),
            "{\"note\":\"line\\nbreak \\\"quoted\\\" ü\"}"
        );
    }

    #[test]
    fn canonicalize_str_normalizes_whitespace_and_order() {
        let out = canonicalize_str("{ \"z\" : [ 1 , 2 ], \"a\" : \"x\" }").unwrap();
        assert_eq!(out, r#"{"a":"x","z":[1,2]}"#);
    }

    #[test]
    fn malformed_json_fails_fast() {
        let err = canonicalize_str("{ not json").unwrap_err();
        assert!(matches!(err, AuditError::Serialization { .. }));
    }

    #[test]
    fn excessive_nesting_is_rejected() {
        let mut v = json!(0);
        for _ in 0..(MAX_PAYLOAD_DEPTH + 1) {
            v = json!([v]);
        }
        let err = canonical_json(&v).unwrap_err();
        assert!(err.to_string().contains("nesting"));
    }

    #[test]
    fn encoding_is_stable_for_identical_fields() {
        assert_eq!(encode_entry(&fields()), encode_entry(&fields()));
    }

    #[test]
    fn absent_and_empty_optionals_encode_differently() {
        let absent = fields();
        let empty = EntryFields {
            entity_id: Some(""),
            ..fields()
        };
        let absent_id = EntryFields {
            entity_id: None,
            ..fields()
        };

        assert_ne!(encode_entry(&empty), encode_entry(&absent_id));
        assert_ne!(encode_entry(&absent), encode_entry(&absent_id));
    }

    #[test]
    fn field_boundaries_cannot_be_shifted() {
        // "ab" + "c" and "a" + "bc" must not collide once length-prefixed.
        let left = EntryFields {
            actor: "ab",
            action: "c",
            ..fields()
        };
        let right = EntryFields {
            actor: "a",
            action: "bc",
            ..fields()
        };
        assert_ne!(encode_entry(&left), encode_entry(&right));
    }

    #[test]
    fn timestamp_is_encoded_at_microsecond_resolution() {
        let base = fields();
        let nanos_only = EntryFields {
            timestamp: base.timestamp + chrono::Duration::nanoseconds(999),
            ..base
        };
        let one_micro = EntryFields {
            timestamp: base.timestamp + chrono::Duration::microseconds(1),
            ..base
        };

        assert_eq!(encode_entry(&base), encode_entry(&nanos_only));
        assert_ne!(encode_entry(&base), encode_entry(&one_micro));
    }

    #[test]
    fn encoding_starts_with_domain_tag_and_version() {
        let bytes = encode_entry(&fields());
        let tag_len = DOMAIN_TAG.len();
        assert_eq!(&bytes[..8], &(tag_len as u64).to_be_bytes());
        assert_eq!(&bytes[8..8 + tag_len], DOMAIN_TAG);
        assert_eq!(bytes[8 + tag_len], ENCODING_VERSION);
    }
}
