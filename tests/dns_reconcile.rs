//! End-to-end DNS reconciliation against the in-memory provider: domain
//! validation, the ownership preflights, and the atomic upsert batch.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use autoglue::config::{DnsConfig, WorkersConfig};
use autoglue::dns::marker::{marker_name, Marker};
use autoglue::dns::provider::{MemoryDns, MemoryDnsFactory, RecordChange};
use autoglue::engine::Engine;
use autoglue::model::{
    AwsSecret, Credential, CredentialScope, Domain, DomainStatus, RecordOwner, RecordSet,
    RecordStatus, Sealed,
};
use autoglue::scheduler::{queues, MemQueue};
use autoglue::secrets::PlainVault;
use autoglue::signing::SigningKeys;
use autoglue::ssh::{ExecOutput, ExecTarget, RemoteExec, SshError};
use autoglue::store::mem::MemStore;

struct NullExec;

#[async_trait]
impl RemoteExec for NullExec {
    async fn exec(
        &self,
        _target: &ExecTarget,
        _command: &str,
        _timeout: Duration,
    ) -> Result<ExecOutput, SshError> {
        panic!("dns reconciliation must never open an ssh session");
    }
}

struct Fixture {
    engine: Engine,
    store: Arc<MemStore>,
    dns: Arc<MemoryDns>,
    queue: Arc<MemQueue>,
    org_id: Uuid,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemStore::new());
    let dns = Arc::new(MemoryDns::new());
    let queue = Arc::new(MemQueue::new());
    let org_id = Uuid::new_v4();
    let engine = Engine {
        store: store.clone(),
        vault: Arc::new(PlainVault),
        exec: Arc::new(NullExec),
        dns: Arc::new(MemoryDnsFactory::new(dns.clone())),
        queue: queue.clone(),
        signing: Arc::new(SigningKeys::new()),
        workers: WorkersConfig::default(),
        dns_cfg: DnsConfig::default(),
    };
    Fixture {
        engine,
        store,
        dns,
        queue,
        org_id,
    }
}

fn sealed_aws_secret() -> Sealed {
    let secret = AwsSecret {
        access_key_id: "AKIAEXAMPLE".into(),
        secret_access_key: "secret".into(),
        region: Some("eu-central-1".into()),
    };
    Sealed {
        ciphertext: B64.encode(serde_json::to_vec(&secret).unwrap()),
        iv: String::new(),
        tag: String::new(),
    }
}

fn seed_domain(f: &Fixture, zone_id: &str, status: DomainStatus) -> Uuid {
    let credential_id = Uuid::new_v4();
    f.store.put_credential(Credential {
        id: credential_id,
        org_id: f.org_id,
        name: "route53".into(),
        scope: CredentialScope {
            version: 1,
            provider: "aws".into(),
            service: "route53".into(),
            domain_id: None,
        },
        secret: sealed_aws_secret(),
    });
    let domain_id = Uuid::new_v4();
    f.store.put_domain(Domain {
        id: domain_id,
        org_id: f.org_id,
        domain_name: "example.com".into(),
        credential_id,
        zone_id: zone_id.into(),
        status,
        last_error: None,
    });
    domain_id
}

fn seed_record(f: &Fixture, domain_id: Uuid, name: &str, record_type: &str) -> Uuid {
    let id = Uuid::new_v4();
    f.store.put_record_set(RecordSet {
        id,
        org_id: f.org_id,
        domain_id,
        name: name.into(),
        record_type: record_type.into(),
        ttl: 300,
        values: vec!["192.0.2.10".into()],
        fingerprint: String::new(),
        status: RecordStatus::Pending,
        owner: RecordOwner::Unknown,
        last_error: None,
    });
    id
}

#[tokio::test]
async fn pending_domain_gets_zone_backfilled() {
    let f = fixture();
    f.dns.add_zone("Z42", "example.com");
    let domain_id = seed_domain(&f, "", DomainStatus::Pending);

    let stats = f.engine.dns_tick().await;
    assert_eq!(stats.succeeded, 1);

    let domain = f.store.domain(domain_id).unwrap();
    assert_eq!(domain.status, DomainStatus::Ready);
    assert_eq!(domain.zone_id, "Z42");
    assert!(domain.last_error.is_none());
    assert_eq!(f.queue.enqueued_for(queues::DNS), 1);
}

#[tokio::test]
async fn missing_zone_fails_the_domain() {
    let f = fixture();
    let domain_id = seed_domain(&f, "", DomainStatus::Pending);

    let stats = f.engine.dns_tick().await;
    assert_eq!(stats.failed, 1);

    let domain = f.store.domain(domain_id).unwrap();
    assert_eq!(domain.status, DomainStatus::Failed);
    assert!(domain.last_error.unwrap().contains("example.com"));
}

#[tokio::test]
async fn clean_apply_plants_marker_and_poison() {
    let f = fixture();
    f.dns.add_zone("Z1", "example.com");
    let domain_id = seed_domain(&f, "Z1", DomainStatus::Ready);
    let record_id = seed_record(&f, domain_id, "api", "A");

    let stats = f.engine.dns_tick().await;
    assert_eq!(stats.succeeded, 1);

    let rs = f.store.record_set(record_id).unwrap();
    assert_eq!(rs.status, RecordStatus::Ready);
    assert_eq!(rs.owner, RecordOwner::Autoglue);
    assert_eq!(rs.fingerprint.len(), 64);
    assert!(rs.last_error.is_none());

    // the real record landed
    let real = f.dns.record("Z1", "api.example.com.", "A").unwrap();
    assert_eq!(real.values, vec!["192.0.2.10".to_string()]);
    assert_eq!(real.ttl, 300);

    // marker carries our org, record, and fingerprint prefix
    let marker = f
        .dns
        .record("Z1", &marker_name("api.example.com"), "TXT")
        .unwrap();
    let parsed = Marker::parse(&marker.values[0]).unwrap();
    assert!(parsed.same_owner(f.org_id, record_id));
    assert_eq!(parsed.short_fp, rs.fingerprint[..16]);

    // both poison names advertise the fake external-dns owner
    for name in ["extdns-api.example.com.", "extdns-a-api.example.com."] {
        let poison = f.dns.record("Z1", name, "TXT").unwrap();
        assert!(poison.values[0].contains("heritage=external-dns"));
        assert!(poison.values[0].contains("external-dns/owner=autoglue"));
    }
}

#[tokio::test]
async fn foreign_external_dns_owner_blocks_the_write() {
    let f = fixture();
    f.dns.add_zone("Z1", "example.com");
    let domain_id = seed_domain(&f, "Z1", DomainStatus::Ready);
    let record_id = seed_record(&f, domain_id, "api", "A");
    f.dns.seed_record(
        "Z1",
        RecordChange {
            name: "extdns-api.example.com.".into(),
            record_type: "TXT".into(),
            ttl: 300,
            values: vec!["\"heritage=external-dns,external-dns/owner=k8s-prod\"".into()],
        },
    );

    let stats = f.engine.dns_tick().await;
    assert_eq!(stats.failed, 1);
    assert_eq!(f.dns.apply_calls(), 0);

    let rs = f.store.record_set(record_id).unwrap();
    assert_eq!(rs.status, RecordStatus::Failed);
    assert_eq!(rs.owner, RecordOwner::External);
    let err = rs.last_error.unwrap();
    assert!(err.starts_with("ownership_conflict"));
    assert!(err.contains("k8s-prod"));
    // the real record never landed
    assert!(f.dns.record("Z1", "api.example.com.", "A").is_none());
}

#[tokio::test]
async fn own_poison_id_is_not_a_conflict() {
    let f = fixture();
    f.dns.add_zone("Z1", "example.com");
    let domain_id = seed_domain(&f, "Z1", DomainStatus::Ready);
    let record_id = seed_record(&f, domain_id, "api", "A");
    // a poison record from a previous run of ours
    f.dns.seed_record(
        "Z1",
        RecordChange {
            name: "extdns-api.example.com.".into(),
            record_type: "TXT".into(),
            ttl: 300,
            values: vec!["\"heritage=external-dns,external-dns/owner=autoglue\"".into()],
        },
    );

    let stats = f.engine.dns_tick().await;
    assert_eq!(stats.succeeded, 1);
    assert_eq!(
        f.store.record_set(record_id).unwrap().status,
        RecordStatus::Ready
    );
}

#[tokio::test]
async fn foreign_marker_blocks_the_write() {
    let f = fixture();
    f.dns.add_zone("Z1", "example.com");
    let domain_id = seed_domain(&f, "Z1", DomainStatus::Ready);
    let record_id = seed_record(&f, domain_id, "api", "A");
    let foreign = Marker::new(Uuid::new_v4(), Uuid::new_v4(), "0123456789abcdef");
    f.dns.seed_record(
        "Z1",
        RecordChange {
            name: marker_name("api.example.com"),
            record_type: "TXT".into(),
            ttl: 300,
            values: vec![format!("\"{}\"", foreign.encode())],
        },
    );

    let stats = f.engine.dns_tick().await;
    assert_eq!(stats.failed, 1);
    assert_eq!(f.dns.apply_calls(), 0);

    let rs = f.store.record_set(record_id).unwrap();
    assert_eq!(rs.status, RecordStatus::Failed);
    assert_eq!(rs.owner, RecordOwner::External);
    assert!(rs.last_error.unwrap().starts_with("ownership_conflict"));
}

#[tokio::test]
async fn external_owned_rows_are_never_reapplied() {
    let f = fixture();
    f.dns.add_zone("Z1", "example.com");
    let domain_id = seed_domain(&f, "Z1", DomainStatus::Ready);
    // a row lost to a conflict earlier, flipped back to pending by an edit
    let record_id = Uuid::new_v4();
    f.store.put_record_set(RecordSet {
        id: record_id,
        org_id: f.org_id,
        domain_id,
        name: "api".into(),
        record_type: "A".into(),
        ttl: 300,
        values: vec!["192.0.2.10".into()],
        fingerprint: String::new(),
        status: RecordStatus::Pending,
        owner: RecordOwner::External,
        last_error: None,
    });

    let stats = f.engine.dns_tick().await;
    assert_eq!(stats.failed, 1);
    assert_eq!(f.dns.apply_calls(), 0);

    let rs = f.store.record_set(record_id).unwrap();
    assert_eq!(rs.status, RecordStatus::Failed);
    assert_eq!(rs.owner, RecordOwner::External);
    assert!(rs.last_error.unwrap().starts_with("ownership_conflict"));
    assert!(f.dns.record("Z1", "api.example.com.", "A").is_none());
}

#[tokio::test]
async fn reapply_is_idempotent() {
    let f = fixture();
    f.dns.add_zone("Z1", "example.com");
    let domain_id = seed_domain(&f, "Z1", DomainStatus::Ready);
    let record_id = seed_record(&f, domain_id, "api", "A");

    f.engine.dns_tick().await;
    let first = f.store.record_set(record_id).unwrap();
    assert_eq!(first.status, RecordStatus::Ready);

    // the api layer flips the row back to pending on edit; an unchanged row
    // re-applies cleanly against its own marker
    let mut rs = first.clone();
    rs.status = RecordStatus::Pending;
    f.store.put_record_set(rs);

    let stats = f.engine.dns_tick().await;
    assert_eq!(stats.succeeded, 1);
    let second = f.store.record_set(record_id).unwrap();
    assert_eq!(second.status, RecordStatus::Ready);
    assert_eq!(second.fingerprint, first.fingerprint);
    assert_eq!(f.dns.apply_calls(), 2);
}

#[tokio::test]
async fn provider_failure_keeps_owner_unknown() {
    let f = fixture();
    f.dns.add_zone("Z1", "example.com");
    let domain_id = seed_domain(&f, "Z1", DomainStatus::Ready);
    let record_id = seed_record(&f, domain_id, "api", "A");
    f.dns.fail_next_applies(true);

    let stats = f.engine.dns_tick().await;
    assert_eq!(stats.failed, 1);

    let rs = f.store.record_set(record_id).unwrap();
    assert_eq!(rs.status, RecordStatus::Failed);
    assert_eq!(rs.owner, RecordOwner::Unknown);
    assert!(rs.last_error.unwrap().contains("injected apply failure"));
}

#[tokio::test]
async fn txt_values_are_quoted_once() {
    let f = fixture();
    f.dns.add_zone("Z1", "example.com");
    let domain_id = seed_domain(&f, "Z1", DomainStatus::Ready);
    let record_id = Uuid::new_v4();
    f.store.put_record_set(RecordSet {
        id: record_id,
        org_id: f.org_id,
        domain_id,
        name: "verify".into(),
        record_type: "TXT".into(),
        ttl: 60,
        values: vec!["token-abc".into(), "\"already-quoted\"".into()],
        fingerprint: String::new(),
        status: RecordStatus::Pending,
        owner: RecordOwner::Unknown,
        last_error: None,
    });

    f.engine.dns_tick().await;
    let rec = f.dns.record("Z1", "verify.example.com.", "TXT").unwrap();
    assert_eq!(
        rec.values,
        vec!["\"token-abc\"".to_string(), "\"already-quoted\"".to_string()]
    );
}
