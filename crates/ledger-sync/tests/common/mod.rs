//! Shared harness for the engine integration tests: a wiremock backend, an
//! in-memory ledger seeded with correlation rows, and attachment files.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::path::PathBuf;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ledger_core::codes::IdProofType;
use ledger_core::{
    Address, CorrelatedLink, CorrelationEntry, CorrelationKind, DocumentAttachment,
    OperationOrigin, SecretInput, Subscriber,
};
use ledger_db::{Database, DbConfig};
use ledger_sync::{Engine, EngineConfig};

pub const SUBSCRIBER_EXTERNAL_ID: i64 = 9001;
pub const PLAN_EXTERNAL_ID: i64 = 77;
pub const SALESPERSON_EXTERNAL_ID: i64 = 501;

pub struct Harness {
    pub server: MockServer,
    pub db: Database,
    pub engine: Engine,
    pub files: TempDir,
}

pub fn config_for(server: &MockServer) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.remote.base_url = server.uri();
    config.remote.api_token = Some("test-token".into());
    config.remote.timeout_secs = 5;
    config.remote.bulk_timeout_secs = 10;
    config.scope.isp_id = Some(3);
    config.scope.branch_id = Some(7);
    config.sync.display_timezone = "UTC".into();
    config
}

pub async fn harness() -> Harness {
    let server = MockServer::start().await;
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    seed_correlations(&db).await;
    let engine = Engine::from_config(config_for(&server), db.clone()).unwrap();
    Harness {
        server,
        db,
        engine,
        files: tempfile::tempdir().unwrap(),
    }
}

pub async fn seed_correlations(db: &Database) {
    let repo = db.correlations();

    let mut salesperson = CorrelationEntry::new(CorrelationKind::Salesperson, "SP-1", SALESPERSON_EXTERNAL_ID);
    salesperson.display_name = Some("Sales One".into());
    salesperson.username = Some("sales.one".into());
    salesperson.user_login = Some("ops@example.net".into());
    salesperson.parent_isp_external_id = Some(3);
    salesperson.parent_branch_local_id = Some("BR-1".into());
    repo.upsert(&salesperson).await.unwrap();

    repo.upsert(&CorrelationEntry::new(CorrelationKind::Plan, "FIBER-100", PLAN_EXTERNAL_ID))
        .await
        .unwrap();
    repo.upsert(&CorrelationEntry::new(CorrelationKind::Plan, "FIBER-200", 78))
        .await
        .unwrap();
    repo.upsert(&CorrelationEntry::new(CorrelationKind::Branch, "BR-1", 7))
        .await
        .unwrap();
    repo.upsert(&CorrelationEntry::new(CorrelationKind::Nas, "NAS-1", 12))
        .await
        .unwrap();
}

/// Writes an attachment file and returns its path.
pub fn attachment(files: &TempDir, name: &str) -> PathBuf {
    let file = files.path().join(name);
    std::fs::write(&file, b"%PDF-1.4 identity document").unwrap();
    file
}

/// A complete, valid draft ready for the saga.
pub fn draft(files: &TempDir) -> Subscriber {
    let mut sub = Subscriber::new("alice", "alice");
    sub.full_name = "Alice Doe".into();
    sub.phone = Some("9800000001".into());
    sub.email = Some("alice@example.net".into());
    sub.links.salesperson = Some(CorrelatedLink::local("SP-1"));
    sub.links.plan = Some(CorrelatedLink::local("FIBER-100"));
    sub.profile.billing = Address::new("12 Main St", "Pune", "411001");
    sub.profile.installation = Address::new("12 Main St", "Pune", "411001");
    sub.profile.id_proof_type = Some(IdProofType::Aadhaar);
    sub.profile.id_proof_number = Some("1234-5678-9012".into());

    let file = attachment(files, "id-front.pdf");
    let mut doc = DocumentAttachment::pending("doc-1", file.to_string_lossy());
    doc.label = Some("id-front.pdf".into());
    sub.documents = vec![doc];
    sub
}

/// A record already mirrored from the backend.
pub fn provisioned(local_id: &str, external_id: i64) -> Subscriber {
    let mut sub = Subscriber::new(local_id, local_id);
    sub.external_id = Some(external_id);
    sub.full_name = format!("{} Example", local_id);
    sub.links.plan = Some(CorrelatedLink::resolved("FIBER-100", PLAN_EXTERNAL_ID));
    sub.links.salesperson = Some(CorrelatedLink::resolved("SP-1", SALESPERSON_EXTERNAL_ID));
    sub
}

pub async fn store(db: &Database, sub: &Subscriber) {
    db.subscribers()
        .insert(sub, OperationOrigin::ReconciliationSync)
        .await
        .unwrap();
}

pub fn secrets() -> SecretInput {
    SecretInput::new("portal-secret", "conn-secret")
}

pub fn mirrored_doc(row_id: &str, remote_id: i64) -> DocumentAttachment {
    let mut doc = DocumentAttachment::pending(row_id, format!("/srv/docs/{}.pdf", row_id));
    doc.remote_document_id = Some(remote_id);
    doc.uploaded = true;
    doc
}

/// `(METHOD, path)` of every request the backend received, in order.
pub async fn requests(server: &MockServer) -> Vec<(String, String)> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| (r.method.to_string(), r.url.path().to_string()))
        .collect()
}

pub fn ok(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

pub fn created(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(201).set_body_json(body)
}

/// Mounts every endpoint a successful saga touches.
pub async fn mount_saga_success(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/subscribers"))
        .respond_with(created(json!({
            "data": {
                "id": SUBSCRIBER_EXTERNAL_ID,
                "username": "alice",
                "expiration_date": "2025-01-31 23:59:59",
                "created_at": "2024-06-01 10:00:00"
            }
        })))
        .mount(server)
        .await;
    mount_saga_followups(server).await;
}

/// Everything after the create call.
pub async fn mount_saga_followups(server: &MockServer) {
    Mock::given(method("PUT"))
        .and(path(format!("/api/subscribers/{}/reset-password", SUBSCRIBER_EXTERNAL_ID)))
        .respond_with(ok(json!({ "success": true })))
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/radcheck/username/alice/expiration"))
        .respond_with(ok(json!({ "success": true })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/packages/{}", PLAN_EXTERNAL_ID)))
        .respond_with(ok(json!({ "data": { "id": PLAN_EXTERNAL_ID, "policy_group": "FIBER_100M" } })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/radusergroup"))
        .respond_with(created(json!({ "success": true })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/subscriber-services"))
        .respond_with(created(json!({ "success": true })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/documents"))
        .respond_with(created(json!({
            "data": {
                "id": 555,
                "file_link": "https://files.example.net/555.pdf",
                "verification_status": "0"
            }
        })))
        .mount(server)
        .await;
}

/// Full remote record for [`SUBSCRIBER_EXTERNAL_ID`].
pub fn detail_body() -> Value {
    json!({
        "data": {
            "id": SUBSCRIBER_EXTERNAL_ID,
            "username": "alice",
            "fullname": "Alice Doe",
            "phone": "9800000001",
            "email": "alice@example.net",
            "connection_status": 1,
            "gender": "female",
            "dob": "1990-04-01",
            "profile_status": 2,
            "connection_type": 1,
            "expiration_date": "2025-01-31 23:59:59",
            "address": "12 Main St",
            "city": "Pune",
            "zip": "411001",
            "installation_address": "{\"address\":\"Flat 4\",\"city\":\"Pune\",\"zip\":\"411002\"}",
            "latitude": 18.52,
            "longitude": 73.85,
            "simultaneous_use": 1,
            "sms_status": 1,
            "email_status": 0,
            "total_data_quota": 100.5,
            "used_data_quota": 12.25,
            "discount_type": 1,
            "discount": 10,
            "identity_type": "Aadhaar Card",
            "identity": "1234-5678-9012",
            "nas_id": 12,
            "package_id": PLAN_EXTERNAL_ID,
            "salesperson_id": SALESPERSON_EXTERNAL_ID,
            "branch_id": 7,
            "created_at": "2024-06-01 10:00:00"
        }
    })
}

pub fn documents_body(ids: &[i64]) -> Value {
    let rows: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "file_name": format!("doc-{}.pdf", id),
                "file_link": format!("https://files.example.net/{}.pdf", id),
                "verification_status": "1",
                "created_at": "2024-06-02 09:30:00"
            })
        })
        .collect();
    json!({ "data": rows })
}
