//! Canonical desired-state fingerprints.
//!
//! The API layer compares a row's stored fingerprint against the recomputed
//! one to decide when to flip status back to `pending`; the reconciler
//! embeds the first 16 hex chars in the ownership marker.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Field order is the canonical (alphabetical) key order of the JSON form.
#[derive(Serialize)]
struct Canonical<'a> {
    fqdn: &'a str,
    ttl: i64,
    #[serde(rename = "type")]
    record_type: String,
    values: Vec<&'a str>,
    zone_id: &'a str,
}

/// SHA-256 over the canonical JSON of `{zone_id, fqdn, upper(type), ttl,
/// sorted(values)}`, lower-hex. Invariant under reordering of `values`.
pub fn fingerprint(zone_id: &str, fqdn: &str, record_type: &str, ttl: i64, values: &[String]) -> String {
    let mut sorted: Vec<&str> = values.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let canonical = Canonical {
        fqdn,
        ttl,
        record_type: record_type.to_ascii_uppercase(),
        values: sorted,
        zone_id,
    };
    let json = serde_json::to_vec(&canonical).expect("canonical form cannot fail to serialize");
    let digest = Sha256::digest(&json);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// First 16 hex chars, as carried in marker values.
pub fn short(fp: &str) -> &str {
    &fp[..fp.len().min(16)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_under_value_reordering() {
        let a = fingerprint(
            "Z1",
            "api.example.com",
            "A",
            300,
            &["1.2.3.4".into(), "5.6.7.8".into()],
        );
        let b = fingerprint(
            "Z1",
            "api.example.com",
            "A",
            300,
            &["5.6.7.8".into(), "1.2.3.4".into()],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn type_case_is_canonicalized() {
        let a = fingerprint("Z1", "api.example.com", "a", 300, &["1.2.3.4".into()]);
        let b = fingerprint("Z1", "api.example.com", "A", 300, &["1.2.3.4".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn every_field_is_load_bearing() {
        let base = fingerprint("Z1", "api.example.com", "A", 300, &["1.2.3.4".into()]);
        assert_ne!(
            base,
            fingerprint("Z2", "api.example.com", "A", 300, &["1.2.3.4".into()])
        );
        assert_ne!(
            base,
            fingerprint("Z1", "api2.example.com", "A", 300, &["1.2.3.4".into()])
        );
        assert_ne!(
            base,
            fingerprint("Z1", "api.example.com", "TXT", 300, &["1.2.3.4".into()])
        );
        assert_ne!(
            base,
            fingerprint("Z1", "api.example.com", "A", 60, &["1.2.3.4".into()])
        );
        assert_ne!(
            base,
            fingerprint("Z1", "api.example.com", "A", 300, &["1.2.3.5".into()])
        );
    }

    #[test]
    fn short_is_sixteen_hex_chars() {
        let fp = fingerprint("Z1", "api.example.com", "A", 300, &["1.2.3.4".into()]);
        assert_eq!(short(&fp).len(), 16);
        assert!(short(&fp).chars().all(|c| c.is_ascii_hexdigit()));
    }
}
