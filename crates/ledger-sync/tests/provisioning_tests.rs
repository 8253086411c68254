//! Provisioning saga, update push and delete against a mock backend.

mod common;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use common::*;
use ledger_core::{
    Actor, CorrelatedLink, MirrorState, OperationContext, SecretInput, SubscriberInput,
};
use ledger_sync::SyncError;

fn user() -> OperationContext {
    OperationContext::user(
        Actor::new("ops@example.net").with_remote_identity(Some(12), Some("ops".into())),
    )
}

// =============================================================================
// Create
// =============================================================================

#[tokio::test]
async fn test_saga_runs_steps_in_order() {
    let h = harness().await;
    mount_saga_success(&h.server).await;

    let input = SubscriberInput::new(draft(&h.files)).with_secrets(secrets());
    let outcome = h.engine.subscribers().create(input, &user()).await.unwrap();

    let provisioned = outcome.provisioned.expect("saga ran");
    assert_eq!(provisioned.external_id, SUBSCRIBER_EXTERNAL_ID);
    assert_eq!(provisioned.uploads.uploaded, 1);

    let calls = requests(&h.server).await;
    let expected = vec![
        ("POST", "/api/subscribers".to_string()),
        ("PUT", format!("/api/subscribers/{}/reset-password", SUBSCRIBER_EXTERNAL_ID)),
        ("PUT", "/api/radcheck/username/alice/expiration".to_string()),
        ("GET", format!("/api/packages/{}", PLAN_EXTERNAL_ID)),
        ("POST", "/api/radusergroup".to_string()),
        ("POST", "/api/subscriber-services".to_string()),
        ("POST", "/api/documents".to_string()),
    ];
    let expected: Vec<(String, String)> = expected
        .into_iter()
        .map(|(m, p)| (m.to_string(), p))
        .collect();
    assert_eq!(calls, expected);

    let stored = h.db.subscribers().get_required("alice").await.unwrap();
    assert_eq!(stored.external_id, Some(SUBSCRIBER_EXTERNAL_ID));
    assert_eq!(stored.mirror_state(), MirrorState::Provisioned);
    assert!(stored.portal_password_set);
    assert!(stored.connection_password_set);
    assert!(stored.last_provision_error.is_none());
    assert_eq!(stored.documents[0].remote_document_id, Some(555));
    assert!(stored.documents[0].uploaded);
}

#[tokio::test]
async fn test_create_sends_temporary_secret_and_real_secrets_on_reset() {
    let h = harness().await;
    mount_saga_success(&h.server).await;

    let input = SubscriberInput::new(draft(&h.files)).with_secrets(secrets());
    h.engine.subscribers().create(input, &user()).await.unwrap();

    let received = h.server.received_requests().await.unwrap();
    let create: serde_json::Value = received[0].body_json().unwrap();
    let temporary = create["password"].as_str().unwrap();
    assert!(temporary.starts_with("TEMP-"));
    assert_ne!(temporary, "portal-secret");
    assert_eq!(create["created_by_id"], SALESPERSON_EXTERNAL_ID);
    assert_eq!(create["created_by_username"], "sales.one");
    assert_eq!(create["package_id"], PLAN_EXTERNAL_ID);
    assert!(create.get("total_data_quota").is_none());

    let reset: serde_json::Value = received[1].body_json().unwrap();
    assert_eq!(reset["username"], "alice");
    assert_eq!(reset["portal_password"], "portal-secret");
    assert_eq!(reset["connection_password"], "conn-secret");

    let expiration: serde_json::Value = received[2].body_json().unwrap();
    assert_eq!(expiration["expirationDate"], "31 Jan 2025 23:59:59");

    let history: serde_json::Value = received[5].body_json().unwrap();
    assert_eq!(history["description"], "Subscribed to FIBER-100");
    assert_eq!(history["subscriber_id"], SUBSCRIBER_EXTERNAL_ID);
}

#[tokio::test]
async fn test_failed_step_compensates_and_clears_external_id() {
    let h = harness().await;

    Mock::given(method("POST"))
        .and(path("/api/subscribers"))
        .respond_with(created(json!({ "data": { "id": SUBSCRIBER_EXTERNAL_ID, "username": "alice" } })))
        .mount(&h.server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/api/subscribers/{}/reset-password", SUBSCRIBER_EXTERNAL_ID)))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "message": "radius down" })))
        .mount(&h.server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/subscribers/{}", SUBSCRIBER_EXTERNAL_ID)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&h.server)
        .await;

    let input = SubscriberInput::new(draft(&h.files)).with_secrets(secrets());
    let err = h.engine.subscribers().create(input, &user()).await.unwrap_err();

    match err {
        SyncError::Provisioning {
            step,
            message,
            compensated,
        } => {
            assert_eq!(step, "reset_secrets");
            assert!(message.contains("radius down"));
            assert!(compensated);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let stored = h.db.subscribers().get_required("alice").await.unwrap();
    assert_eq!(stored.external_id, None);
    assert_eq!(stored.mirror_state(), MirrorState::LocalOnly);
    assert!(stored.last_provision_error.unwrap().contains("reset_secrets"));

    let calls = requests(&h.server).await;
    assert_eq!(calls.last().unwrap().0, "DELETE");
    assert!(!calls.iter().any(|(_, p)| p.contains("/radusergroup")));
}

#[tokio::test]
async fn test_external_id_is_persisted_before_later_steps() {
    // With a failing compensation the remote record survives, so the id
    // written in step 2 must still be there.
    let h = harness().await;

    Mock::given(method("POST"))
        .and(path("/api/subscribers"))
        .respond_with(created(json!({ "id": SUBSCRIBER_EXTERNAL_ID })))
        .mount(&h.server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/api/subscribers/{}/reset-password", SUBSCRIBER_EXTERNAL_ID)))
        .respond_with(ResponseTemplate::new(503))
        .mount(&h.server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/subscribers/{}", SUBSCRIBER_EXTERNAL_ID)))
        .respond_with(ResponseTemplate::new(500))
        .mount(&h.server)
        .await;

    let input = SubscriberInput::new(draft(&h.files)).with_secrets(secrets());
    let err = h.engine.subscribers().create(input, &user()).await.unwrap_err();
    assert!(matches!(err, SyncError::Provisioning { compensated: false, .. }));

    let stored = h.db.subscribers().get_required("alice").await.unwrap();
    assert_eq!(stored.external_id, Some(SUBSCRIBER_EXTERNAL_ID));
    assert!(stored.last_provision_error.unwrap().contains("compensation failed"));
}

#[tokio::test]
async fn test_rejected_create_leaves_local_record_unprovisioned() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/api/subscribers"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({ "message": "username taken" })))
        .mount(&h.server)
        .await;

    let input = SubscriberInput::new(draft(&h.files)).with_secrets(secrets());
    let err = h.engine.subscribers().create(input, &user()).await.unwrap_err();
    assert!(matches!(err, SyncError::Provisioning { compensated: false, .. }));

    let stored = h.db.subscribers().get_required("alice").await.unwrap();
    assert_eq!(stored.mirror_state(), MirrorState::LocalOnly);
    assert_eq!(requests(&h.server).await.len(), 1);
}

#[tokio::test]
async fn test_canonical_username_is_adopted() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/api/subscribers"))
        .respond_with(created(json!({ "data": { "id": SUBSCRIBER_EXTERNAL_ID, "username": "alice01" } })))
        .mount(&h.server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/api/subscribers/{}/reset-password", SUBSCRIBER_EXTERNAL_ID)))
        .and(body_partial_json(json!({ "username": "alice01" })))
        .respond_with(ok(json!({})))
        .expect(1)
        .mount(&h.server)
        .await;
    mount_saga_followups(&h.server).await;

    let input = SubscriberInput::new(draft(&h.files)).with_secrets(secrets());
    let outcome = h.engine.subscribers().create(input, &user()).await.unwrap();
    assert_eq!(outcome.provisioned.unwrap().username, "alice01");

    let stored = h.db.subscribers().get_required("alice").await.unwrap();
    assert_eq!(stored.username, "alice01");
}

#[tokio::test]
async fn test_compensation_restores_local_username() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/api/subscribers"))
        .respond_with(created(json!({ "data": { "id": SUBSCRIBER_EXTERNAL_ID, "username": "alice01" } })))
        .mount(&h.server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/api/subscribers/{}/reset-password", SUBSCRIBER_EXTERNAL_ID)))
        .respond_with(ResponseTemplate::new(500))
        .mount(&h.server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/api/subscribers/{}", SUBSCRIBER_EXTERNAL_ID)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&h.server)
        .await;

    let input = SubscriberInput::new(draft(&h.files)).with_secrets(secrets());
    let err = h.engine.subscribers().create(input, &user()).await.unwrap_err();
    assert!(matches!(err, SyncError::Provisioning { compensated: true, .. }));

    let stored = h.db.subscribers().get_required("alice").await.unwrap();
    assert_eq!(stored.external_id, None);
    assert_eq!(stored.username, "alice");
}

#[tokio::test]
async fn test_failed_upload_is_recorded_without_compensation() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/api/documents"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "message": "disk full" })))
        .mount(&h.server)
        .await;
    mount_saga_success(&h.server).await;

    let input = SubscriberInput::new(draft(&h.files)).with_secrets(secrets());
    let outcome = h.engine.subscribers().create(input, &user()).await.unwrap();
    let provisioned = outcome.provisioned.unwrap();
    assert_eq!(provisioned.external_id, SUBSCRIBER_EXTERNAL_ID);
    assert_eq!(provisioned.uploads.failed(), 1);

    let stored = h.db.subscribers().get_required("alice").await.unwrap();
    assert_eq!(stored.external_id, Some(SUBSCRIBER_EXTERNAL_ID));
    assert_eq!(stored.mirror_state(), MirrorState::Provisioned);
    assert!(!stored.documents[0].uploaded);
    assert!(stored.documents[0]
        .last_upload_error
        .as_deref()
        .unwrap()
        .contains("disk full"));

    let calls = requests(&h.server).await;
    assert!(!calls.iter().any(|(m, _)| m == "DELETE"));
}

#[tokio::test]
async fn test_invalid_draft_never_reaches_backend() {
    let h = harness().await;
    let mut sub = draft(&h.files);
    sub.phone = None;

    let err = h
        .engine
        .subscribers()
        .create(SubscriberInput::new(sub).with_secrets(secrets()), &user())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Validation(_)));
    assert!(requests(&h.server).await.is_empty());
    assert!(!h.db.subscribers().exists("alice").await.unwrap());
}

#[tokio::test]
async fn test_retry_provisioning_after_failure() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/api/subscribers"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&h.server)
        .await;

    let input = SubscriberInput::new(draft(&h.files)).with_secrets(secrets());
    assert!(h.engine.subscribers().create(input, &user()).await.is_err());

    mount_saga_success(&h.server).await;
    let outcome = h
        .engine
        .subscribers()
        .retry_provisioning("alice", &secrets(), &user().actor)
        .await
        .unwrap();
    assert_eq!(outcome.external_id, SUBSCRIBER_EXTERNAL_ID);

    let err = h
        .engine
        .subscribers()
        .retry_provisioning("alice", &secrets(), &user().actor)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
}

// =============================================================================
// Update / Delete
// =============================================================================

#[tokio::test]
async fn test_update_pushes_record_and_history_on_plan_change() {
    let h = harness().await;
    store(&h.db, &provisioned("bob", 42)).await;

    Mock::given(method("PUT"))
        .and(path("/api/subscribers/42"))
        .respond_with(ok(json!({ "success": true })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/subscriber-services"))
        .and(body_partial_json(json!({ "package_id": 78, "description": "Package updated" })))
        .respond_with(created(json!({})))
        .expect(1)
        .mount(&h.server)
        .await;

    let mut edited = h.db.subscribers().get_required("bob").await.unwrap();
    edited.full_name = "Bob Renamed".into();
    edited.links.plan = Some(CorrelatedLink::local("FIBER-200"));

    let outcome = h
        .engine
        .subscribers()
        .save(SubscriberInput::new(edited), &user())
        .await
        .unwrap();
    assert!(outcome.analysis.plan_changed);

    let stored = h.db.subscribers().get_required("bob").await.unwrap();
    assert_eq!(stored.full_name, "Bob Renamed");
    assert_eq!(stored.links.plan.unwrap().external_id, Some(78));
    assert!(!requests(&h.server).await.iter().any(|(_, p)| p.contains("reset-password")));
}

#[tokio::test]
async fn test_rejected_update_is_not_saved_locally() {
    let h = harness().await;
    store(&h.db, &provisioned("bob", 42)).await;

    Mock::given(method("PUT"))
        .and(path("/api/subscribers/42"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "message": "bad phone" })))
        .mount(&h.server)
        .await;

    let mut edited = h.db.subscribers().get_required("bob").await.unwrap();
    edited.phone = Some("not-a-phone".into());

    let err = h
        .engine
        .subscribers()
        .save(SubscriberInput::new(edited), &user())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::RemoteRejection { status: 400, .. }));

    let stored = h.db.subscribers().get_required("bob").await.unwrap();
    assert_eq!(stored.phone, None);
}

#[tokio::test]
async fn test_update_with_secrets_resets_them() {
    let h = harness().await;
    store(&h.db, &provisioned("bob", 42)).await;

    Mock::given(method("PUT"))
        .and(path("/api/subscribers/42"))
        .respond_with(ok(json!({})))
        .mount(&h.server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/subscribers/42/reset-password"))
        .and(body_partial_json(json!({ "username": "bob", "portal_password": "new-portal" })))
        .respond_with(ok(json!({})))
        .expect(1)
        .mount(&h.server)
        .await;

    let record = h.db.subscribers().get_required("bob").await.unwrap();
    let secrets = SecretInput {
        portal_password: Some(ledger_core::Secret::new("new-portal")),
        connection_password: Some(ledger_core::Secret::new("   ")),
    };
    h.engine
        .subscribers()
        .save(SubscriberInput::new(record).with_secrets(secrets), &user())
        .await
        .unwrap();

    let received = h.server.received_requests().await.unwrap();
    let reset: serde_json::Value = received[1].body_json().unwrap();
    assert!(reset.get("connection_password").is_none());

    let stored = h.db.subscribers().get_required("bob").await.unwrap();
    assert!(stored.portal_password_set);
    assert!(!stored.connection_password_set);
}

#[tokio::test]
async fn test_update_deletes_removed_documents_remotely() {
    let h = harness().await;
    let mut bob = provisioned("bob", 42);
    bob.documents = vec![mirrored_doc("row-a", 1), mirrored_doc("row-b", 2)];
    store(&h.db, &bob).await;

    Mock::given(method("PUT"))
        .and(path("/api/subscribers/42"))
        .respond_with(ok(json!({})))
        .mount(&h.server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/documents/2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&h.server)
        .await;

    let mut edited = h.db.subscribers().get_required("bob").await.unwrap();
    edited.documents.retain(|d| d.row_id != "row-b");
    h.engine
        .subscribers()
        .save(SubscriberInput::new(edited), &user())
        .await
        .unwrap();

    let calls = requests(&h.server).await;
    assert_eq!(
        calls,
        vec![
            ("PUT".to_string(), "/api/subscribers/42".to_string()),
            ("DELETE".to_string(), "/api/documents/2".to_string()),
        ]
    );
    let stored = h.db.subscribers().get_required("bob").await.unwrap();
    assert_eq!(stored.documents.len(), 1);
    assert_eq!(stored.documents[0].row_id, "row-a");
}

#[tokio::test]
async fn test_update_treats_missing_remote_document_as_deleted() {
    let h = harness().await;
    let mut bob = provisioned("bob", 42);
    bob.documents = vec![mirrored_doc("row-a", 1), mirrored_doc("row-b", 2)];
    store(&h.db, &bob).await;

    Mock::given(method("PUT"))
        .and(path("/api/subscribers/42"))
        .respond_with(ok(json!({})))
        .mount(&h.server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/documents/1"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&h.server)
        .await;

    let mut edited = h.db.subscribers().get_required("bob").await.unwrap();
    edited.documents.retain(|d| d.row_id != "row-a");
    h.engine
        .subscribers()
        .save(SubscriberInput::new(edited), &user())
        .await
        .unwrap();

    let stored = h.db.subscribers().get_required("bob").await.unwrap();
    let rows: Vec<&str> = stored.documents.iter().map(|d| d.row_id.as_str()).collect();
    assert_eq!(rows, vec!["row-b"]);
}

#[tokio::test]
async fn test_delete_tolerates_remote_failure() {
    let h = harness().await;
    store(&h.db, &provisioned("bob", 42)).await;

    Mock::given(method("DELETE"))
        .and(path("/api/subscribers/42"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&h.server)
        .await;

    let deleted = h.engine.subscribers().delete("bob", &user()).await.unwrap();
    assert!(deleted);
    assert!(!h.db.subscribers().exists("bob").await.unwrap());
}
