//! Subscriber actions, pipeline triggers, and the job worker.

mod common;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use common::*;
use ledger_core::SecretInput;
use ledger_db::JobStatus;
use ledger_sync::{SyncError, SyncJobKind};

// =============================================================================
// Actions
// =============================================================================

#[tokio::test]
async fn test_reset_passwords_sets_flags() {
    let h = harness().await;
    store(&h.db, &provisioned("bob", 42)).await;

    Mock::given(method("PUT"))
        .and(path("/api/subscribers/42/reset-password"))
        .and(body_partial_json(json!({ "username": "bob", "connection_password": "c0nn" })))
        .respond_with(ok(json!({ "success": true })))
        .expect(1)
        .mount(&h.server)
        .await;

    let secrets = SecretInput {
        portal_password: None,
        connection_password: Some(ledger_core::Secret::new("c0nn")),
    };
    h.engine.actions().reset_passwords("bob", &secrets).await.unwrap();

    let stored = h.db.subscribers().get_required("bob").await.unwrap();
    assert!(stored.connection_password_set);
    assert!(!stored.portal_password_set);
}

#[tokio::test]
async fn test_reset_passwords_requires_a_secret() {
    let h = harness().await;
    store(&h.db, &provisioned("bob", 42)).await;

    let err = h
        .engine
        .actions()
        .reset_passwords("bob", &SecretInput::new("  ", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert!(requests(&h.server).await.is_empty());
}

#[tokio::test]
async fn test_actions_need_a_provisioned_subscriber() {
    let h = harness().await;
    store(&h.db, &draft(&h.files)).await;

    let err = h.engine.actions().disconnect("alice").await.unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    let err = h.engine.actions().revoke_recharge("nobody").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_network_toggle_uses_username() {
    let h = harness().await;
    store(&h.db, &provisioned("bob", 42)).await;

    Mock::given(method("POST"))
        .and(path("/api/radcheck/disable-net"))
        .and(body_partial_json(json!({ "username": "bob" })))
        .respond_with(ok(json!({ "success": true })))
        .expect(1)
        .mount(&h.server)
        .await;

    h.engine.actions().set_network_enabled("bob", false).await.unwrap();
}

#[tokio::test]
async fn test_profile_toggle_refreshes_details() {
    let h = harness().await;
    store(&h.db, &provisioned("alice", SUBSCRIBER_EXTERNAL_ID)).await;

    Mock::given(method("PUT"))
        .and(path(format!("/api/subscribers/{}/disable-profile", SUBSCRIBER_EXTERNAL_ID)))
        .respond_with(ok(json!({ "success": true })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/subscribers/{}", SUBSCRIBER_EXTERNAL_ID)))
        .respond_with(ok(detail_body()))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/documents/subscriber/{}", SUBSCRIBER_EXTERNAL_ID)))
        .respond_with(ok(documents_body(&[])))
        .mount(&h.server)
        .await;

    h.engine.actions().set_profile_enabled("alice", false).await.unwrap();

    let stored = h.db.subscribers().get_required("alice").await.unwrap();
    assert!(stored.details_synced);
}

#[tokio::test]
async fn test_failed_refresh_does_not_fail_the_action() {
    let h = harness().await;
    store(&h.db, &provisioned("bob", 42)).await;

    Mock::given(method("POST"))
        .and(path("/api/subscribers/42/revoke-recharge"))
        .respond_with(ok(json!({ "success": true })))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/subscribers/42"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&h.server)
        .await;

    h.engine.actions().revoke_recharge("bob").await.unwrap();
}

// =============================================================================
// Pipeline Triggers
// =============================================================================

#[tokio::test]
async fn test_list_sync_enqueues_bulk_details_once() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/api/subscribers"))
        .respond_with(ok(json!({ "data": [] })))
        .mount(&h.server)
        .await;

    let (report, first) = h
        .engine
        .actions()
        .sync_list_and_enqueue_bulk_details(50)
        .await
        .unwrap();
    assert_eq!(report.fetched, 0);
    assert!(!first.deduplicated);

    let (_, second) = h
        .engine
        .actions()
        .sync_list_and_enqueue_bulk_details(50)
        .await
        .unwrap();
    assert!(second.deduplicated);
    assert_eq!(second.id, first.id);

    let job = h.db.jobs().get(&first.id).await.unwrap().unwrap();
    assert_eq!(job.job_name, "sync_all_details");
    assert_eq!(job.queue, "long");
    assert_eq!(job.timeout_secs as u64, h.engine.config().jobs.bulk_details_timeout_secs);
}

#[tokio::test]
async fn test_enqueue_details_rejects_unprovisioned() {
    let h = harness().await;
    store(&h.db, &draft(&h.files)).await;

    let err = h
        .engine
        .actions()
        .enqueue_subscriber_details("alice")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert_eq!(h.db.jobs().count_by_status(JobStatus::Queued).await.unwrap(), 0);
}

// =============================================================================
// Worker
// =============================================================================

#[tokio::test]
async fn test_worker_runs_queued_detail_job() {
    let h = harness().await;
    store(&h.db, &provisioned("alice", SUBSCRIBER_EXTERNAL_ID)).await;
    Mock::given(method("GET"))
        .and(path(format!("/api/subscribers/{}", SUBSCRIBER_EXTERNAL_ID)))
        .respond_with(ok(detail_body()))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/documents/subscriber/{}", SUBSCRIBER_EXTERNAL_ID)))
        .respond_with(ok(documents_body(&[7])))
        .mount(&h.server)
        .await;

    let job = h.engine.actions().enqueue_subscriber_details("alice").await.unwrap();

    let (worker, _handle) = h.engine.job_worker();
    assert_eq!(worker.run_pending().await.unwrap(), 1);

    let stored = h.db.jobs().get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Done);
    assert_eq!(stored.attempts, 1);

    let sub = h.db.subscribers().get_required("alice").await.unwrap();
    assert!(sub.details_synced);
    assert_eq!(sub.documents.len(), 1);
}

#[tokio::test]
async fn test_worker_reschedules_transient_failures() {
    let h = harness().await;
    store(&h.db, &provisioned("bob", 42)).await;
    Mock::given(method("GET"))
        .and(path("/api/subscribers/42"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&h.server)
        .await;

    let job = h.engine.actions().enqueue_subscriber_details("bob").await.unwrap();

    let (worker, _handle) = h.engine.job_worker();
    assert_eq!(worker.run_pending().await.unwrap(), 1);

    let stored = h.db.jobs().get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Queued);
    assert!(stored.run_after > chrono::Utc::now());
    assert!(stored.last_error.unwrap().contains("502"));
}

#[tokio::test]
async fn test_worker_fails_permanent_errors() {
    let h = harness().await;
    store(&h.db, &provisioned("bob", 42)).await;
    Mock::given(method("GET"))
        .and(path("/api/subscribers/42"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&h.server)
        .await;

    let job = h.engine.actions().enqueue_subscriber_details("bob").await.unwrap();

    let (worker, _handle) = h.engine.job_worker();
    worker.run_pending().await.unwrap();

    let stored = h.db.jobs().get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_worker_stops_on_shutdown() {
    let h = harness().await;
    let (worker, handle) = h.engine.job_worker();
    let task = tokio::spawn(worker.run());

    handle.shutdown().await.unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), task)
        .await
        .expect("worker stopped")
        .unwrap();
}

#[test]
fn test_job_kind_round_trip_through_names() {
    assert_eq!(SyncJobKind::SyncAllDetails.job_name(), "sync_all_details");
    assert_eq!(SyncJobKind::SyncList { page_size: 50 }.job_name(), "sync_list");
}
