//! # Remote API
//!
//! One method per backend endpoint the engine consumes, on top of
//! [`RemoteGateway`]. Request bodies come from the field mapper; responses
//! are handed back to it for parsing.
//!
//! | Method | Path | Expected |
//! |--------|------|----------|
//! | POST   | `/subscribers` | 200, 201 |
//! | PUT    | `/subscribers/{id}` | 200, 201 |
//! | DELETE | `/subscribers/{id}` | 200, 204, 404 |
//! | GET    | `/subscribers?limit&offset` | 200 |
//! | GET    | `/subscribers/{id}` | 200 |
//! | PUT    | `/subscribers/{id}/reset-password` | 200 |
//! | PUT    | `/radcheck/username/{u}/expiration` | 200 |
//! | GET    | `/packages/{id}` | 200 |
//! | POST   | `/radusergroup` | 200, 201 |
//! | POST   | `/subscriber-services` | 200, 201 |
//! | POST   | `/documents` (multipart) | 201 |
//! | GET    | `/documents/subscriber/{id}` | 200 |
//! | DELETE | `/documents/{id}` | 200, 204, 404 |
//! | POST   | `/radacct/disconnect` | 200, 201 |
//! | POST   | `/radcheck/disable-net`, `/radcheck/enable-net` | 200, 201 |
//! | PUT    | `/subscribers/{id}/disable-profile`, `enable-profile` | 200, 201 |
//! | POST   | `/subscribers/{id}/revoke-recharge` | 200, 201 |

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use ledger_core::mapper::{
    self, CreatedSubscriber, ListPage, RemoteDocument, UploadReceipt,
};

use crate::error::SyncResult;
use crate::gateway::{
    DeleteOutcome, RemoteGateway, UploadForm, EXPECT_CREATED, EXPECT_OK, EXPECT_UPLOADED,
};

/// Characters escaped inside a single path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn segment(raw: &str) -> String {
    utf8_percent_encode(raw, PATH_SEGMENT).to_string()
}

/// Typed facade over the backend.
#[derive(Debug, Clone)]
pub struct RemoteApi {
    gateway: RemoteGateway,
}

impl RemoteApi {
    pub fn new(gateway: RemoteGateway) -> Self {
        RemoteApi { gateway }
    }

    pub fn gateway(&self) -> &RemoteGateway {
        &self.gateway
    }

    /// Copy of this API for the bulk-job timeout profile.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        RemoteApi::new(self.gateway.with_timeout(timeout))
    }

    // =========================================================================
    // Subscribers
    // =========================================================================

    pub async fn create_subscriber(&self, payload: &Value) -> SyncResult<CreatedSubscriber> {
        let response = self
            .gateway
            .post_json("/subscribers", payload, EXPECT_CREATED)
            .await?;
        Ok(mapper::parse_create_response(&response)?)
    }

    pub async fn update_subscriber(&self, external_id: i64, payload: &Value) -> SyncResult<()> {
        self.gateway
            .put_json(&format!("/subscribers/{}", external_id), payload, EXPECT_CREATED)
            .await?;
        Ok(())
    }

    pub async fn delete_subscriber(&self, external_id: i64) -> SyncResult<DeleteOutcome> {
        self.gateway
            .delete(&format!("/subscribers/{}", external_id))
            .await
    }

    pub async fn list_subscribers(&self, limit: usize, offset: usize) -> SyncResult<ListPage> {
        let response = self
            .gateway
            .get_json(
                "/subscribers",
                &[("limit", limit.to_string()), ("offset", offset.to_string())],
            )
            .await?;
        Ok(mapper::parse_list_page(&response))
    }

    pub async fn get_subscriber(&self, external_id: i64) -> SyncResult<Value> {
        self.gateway
            .get_json(&format!("/subscribers/{}", external_id), &[])
            .await
    }

    // =========================================================================
    // Credentials / RADIUS
    // =========================================================================

    /// Unified reset of the portal password and the RADIUS check record.
    pub async fn reset_password(&self, external_id: i64, body: &Value) -> SyncResult<()> {
        self.gateway
            .put_json(
                &format!("/subscribers/{}/reset-password", external_id),
                body,
                EXPECT_OK,
            )
            .await?;
        Ok(())
    }

    /// `formatted` is already in `DD Mon YYYY HH:MM:SS`.
    pub async fn set_expiration(&self, username: &str, formatted: &str) -> SyncResult<()> {
        self.gateway
            .put_json(
                &format!("/radcheck/username/{}/expiration", segment(username)),
                &mapper::expiration_body(formatted),
                EXPECT_OK,
            )
            .await?;
        Ok(())
    }

    pub async fn get_plan(&self, plan_external_id: i64) -> SyncResult<Value> {
        self.gateway
            .get_json(&format!("/packages/{}", plan_external_id), &[])
            .await
    }

    pub async fn bind_policy_group(&self, username: &str, group: &str) -> SyncResult<()> {
        self.gateway
            .post_json(
                "/radusergroup",
                &mapper::policy_binding_body(username, group),
                EXPECT_CREATED,
            )
            .await?;
        Ok(())
    }

    pub async fn record_service_history(&self, body: &Value) -> SyncResult<()> {
        self.gateway
            .post_json("/subscriber-services", body, EXPECT_CREATED)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Documents
    // =========================================================================

    pub async fn upload_document(&self, form: UploadForm) -> SyncResult<UploadReceipt> {
        let response = self
            .gateway
            .upload("/documents", form, EXPECT_UPLOADED)
            .await?;
        Ok(mapper::parse_upload_response(&response)?)
    }

    pub async fn list_documents(&self, subscriber_external_id: i64) -> SyncResult<Vec<RemoteDocument>> {
        let response = self
            .gateway
            .get_json(
                &format!("/documents/subscriber/{}", subscriber_external_id),
                &[],
            )
            .await?;
        let documents = mapper::parse_remote_documents(&response);
        debug!(
            subscriber_external_id,
            count = documents.len(),
            "Fetched remote documents"
        );
        Ok(documents)
    }

    pub async fn delete_document(&self, document_id: i64) -> SyncResult<DeleteOutcome> {
        self.gateway
            .delete(&format!("/documents/{}", document_id))
            .await
    }

    // =========================================================================
    // Session / Profile Actions
    // =========================================================================

    pub async fn disconnect_session(&self, username: &str) -> SyncResult<()> {
        self.gateway
            .post_json("/radacct/disconnect", &json!({ "username": username }), EXPECT_CREATED)
            .await?;
        Ok(())
    }

    pub async fn set_network_enabled(&self, username: &str, enabled: bool) -> SyncResult<()> {
        let path = if enabled {
            "/radcheck/enable-net"
        } else {
            "/radcheck/disable-net"
        };
        self.gateway
            .post_json(path, &json!({ "username": username }), EXPECT_CREATED)
            .await?;
        Ok(())
    }

    pub async fn set_profile_enabled(&self, external_id: i64, enabled: bool) -> SyncResult<()> {
        let action = if enabled {
            "enable-profile"
        } else {
            "disable-profile"
        };
        self.gateway
            .put_json(
                &format!("/subscribers/{}/{}", external_id, action),
                &json!({}),
                EXPECT_CREATED,
            )
            .await?;
        Ok(())
    }

    pub async fn revoke_recharge(&self, external_id: i64) -> SyncResult<()> {
        self.gateway
            .post_json(
                &format!("/subscribers/{}/revoke-recharge", external_id),
                &json!({}),
                EXPECT_CREATED,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_segment_is_escaped() {
        assert_eq!(segment("alice"), "alice");
        assert_eq!(segment("a b/c"), "a%20b%2Fc");
    }
}
