//! Ownership-marker protocol.
//!
//! Two TXT families defend a name: autoglue's own marker at
//! `_autoglue.<fqdn>.`, and "poison" records in the shape external-dns uses
//! for its registry (`extdns-<fqdn>.` / `extdns-<type>-<fqdn>.`) that make a
//! co-running external-dns instance believe the name already belongs to
//! another controller. The protocol itself is provider-agnostic.

use uuid::Uuid;

pub const MARKER_VERSION: &str = "ag1";

/// `_autoglue.<fqdn>.`
pub fn marker_name(fqdn: &str) -> String {
    format!("_autoglue.{}.", fqdn.trim_end_matches('.'))
}

/// The two names external-dns consults for a record of `record_type` at
/// `fqdn`: `extdns-<fqdn>.` and `extdns-<lowertype>-<fqdn>.`.
pub fn external_dns_names(fqdn: &str, record_type: &str) -> (String, String) {
    let fqdn = fqdn.trim_end_matches('.');
    (
        format!("extdns-{fqdn}."),
        format!("extdns-{}-{fqdn}.", record_type.to_ascii_lowercase()),
    )
}

/// Decoded autoglue marker value: `v=ag1 org=<uuid> rec=<uuid> fp=<16-hex>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub org_id: Uuid,
    pub record_id: Uuid,
    pub short_fp: String,
}

impl Marker {
    pub fn new(org_id: Uuid, record_id: Uuid, short_fp: impl Into<String>) -> Self {
        Self {
            org_id,
            record_id,
            short_fp: short_fp.into(),
        }
    }

    pub fn encode(&self) -> String {
        format!(
            "v={MARKER_VERSION} org={} rec={} fp={}",
            self.org_id, self.record_id, self.short_fp
        )
    }

    pub fn parse(value: &str) -> Option<Self> {
        let mut version = None;
        let mut org_id = None;
        let mut record_id = None;
        let mut short_fp = None;
        for part in value.trim().trim_matches('"').split_ascii_whitespace() {
            let (k, v) = part.split_once('=')?;
            match k {
                "v" => version = Some(v.to_string()),
                "org" => org_id = v.parse().ok(),
                "rec" => record_id = v.parse().ok(),
                "fp" => short_fp = Some(v.to_string()),
                _ => {}
            }
        }
        if version.as_deref() != Some(MARKER_VERSION) {
            return None;
        }
        Some(Self {
            org_id: org_id?,
            record_id: record_id?,
            short_fp: short_fp?,
        })
    }

    /// Whether this marker claims the same row (org + record). The fp part
    /// is informational; a stale fp self-heals on the next upsert.
    pub fn same_owner(&self, org_id: Uuid, record_id: Uuid) -> bool {
        self.org_id == org_id && self.record_id == record_id
    }
}

/// Owner id from an external-dns heritage TXT value
/// (`heritage=external-dns,...,external-dns/owner=<id>`), or `None` if the
/// value is not external-dns-shaped.
pub fn parse_heritage_owner(value: &str) -> Option<String> {
    let value = value.trim().trim_matches('"');
    let mut is_external_dns = false;
    let mut owner = None;
    for part in value.split(',') {
        match part.trim().split_once('=') {
            Some(("heritage", "external-dns")) => is_external_dns = true,
            Some(("external-dns/owner", id)) => owner = Some(id.to_string()),
            _ => {}
        }
    }
    if is_external_dns {
        owner
    } else {
        None
    }
}

/// The heritage value autoglue plants to deter external-dns.
pub fn poison_value(poison_owner_id: &str) -> String {
    format!("heritage=external-dns,external-dns/owner={poison_owner_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_round_trips() {
        let marker = Marker::new(Uuid::new_v4(), Uuid::new_v4(), "deadbeefdeadbeef");
        let parsed = Marker::parse(&marker.encode()).unwrap();
        assert_eq!(parsed, marker);
    }

    #[test]
    fn marker_parse_rejects_other_versions_and_noise() {
        assert!(Marker::parse("v=ag2 org=x rec=y fp=z").is_none());
        assert!(Marker::parse("heritage=external-dns,external-dns/owner=other").is_none());
        assert!(Marker::parse("").is_none());
    }

    #[test]
    fn marker_parse_handles_route53_quoting() {
        let marker = Marker::new(Uuid::new_v4(), Uuid::new_v4(), "0123456789abcdef");
        let quoted = format!("\"{}\"", marker.encode());
        assert_eq!(Marker::parse(&quoted).unwrap(), marker);
    }

    #[test]
    fn heritage_owner_extraction() {
        assert_eq!(
            parse_heritage_owner("heritage=external-dns,external-dns/owner=other"),
            Some("other".to_string())
        );
        assert_eq!(
            parse_heritage_owner(
                "\"heritage=external-dns,external-dns/resource=ingress/x,external-dns/owner=k8s\""
            ),
            Some("k8s".to_string())
        );
        assert_eq!(parse_heritage_owner("heritage=terraform,owner=me"), None);
        assert_eq!(parse_heritage_owner("unrelated txt value"), None);
    }

    #[test]
    fn names_are_dotted_and_lowercased() {
        assert_eq!(marker_name("api.example.com"), "_autoglue.api.example.com.");
        let (plain, typed) = external_dns_names("api.example.com", "A");
        assert_eq!(plain, "extdns-api.example.com.");
        assert_eq!(typed, "extdns-a-api.example.com.");
    }
}
