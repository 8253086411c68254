//! # Correlation Resolver
//!
//! Bidirectional id translation for the foreign entities a subscriber links
//! to, backed by the ledger's correlation tables.
//!
//! ```text
//! local_id ──to_external()──► external_id     (outbound payloads)
//! external_id ──to_local()──► CorrelatedLink  (detail reconciliation)
//! ```
//!
//! The tables are filled by separate catalog syncs. A row older than the
//! configured tolerance is still used, with a warning, since a stale id is
//! far more likely to be right than no id at all.

use chrono::{Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use ledger_core::mapper;
use ledger_core::{CorrelatedLink, CorrelationEntry, CorrelationKind, Subscriber};
use ledger_db::CorrelationRepository;

use crate::error::SyncResult;

#[derive(Debug, Clone)]
pub struct CorrelationResolver {
    repo: CorrelationRepository,
    max_staleness: Duration,
}

impl CorrelationResolver {
    pub fn new(repo: CorrelationRepository, max_staleness_hours: i64) -> Self {
        CorrelationResolver {
            repo,
            max_staleness: Duration::hours(max_staleness_hours.max(0)),
        }
    }

    fn note_staleness(&self, entry: &CorrelationEntry) {
        let age = Utc::now() - entry.refreshed_at;
        if age > self.max_staleness {
            warn!(
                kind = %entry.kind,
                local_id = %entry.local_id,
                external_id = entry.external_id,
                age_hours = age.num_hours(),
                "Using stale correlation entry"
            );
        }
    }

    /// Full row for a local key.
    pub async fn entry(&self, kind: CorrelationKind, local_id: &str) -> SyncResult<Option<CorrelationEntry>> {
        let entry = self.repo.get(kind, local_id).await?;
        if let Some(entry) = &entry {
            self.note_staleness(entry);
        }
        Ok(entry)
    }

    /// Backend id for a local key.
    pub async fn to_external(&self, kind: CorrelationKind, local_id: &str) -> SyncResult<Option<i64>> {
        Ok(self.entry(kind, local_id).await?.map(|e| e.external_id))
    }

    /// Local link for a backend id.
    pub async fn to_local(&self, kind: CorrelationKind, external_id: i64) -> SyncResult<Option<CorrelatedLink>> {
        let entry = self.repo.find_by_external_id(kind, external_id).await?;
        Ok(entry.map(|e| {
            self.note_staleness(&e);
            e.as_link()
        }))
    }

    /// Salesperson row belonging to a local user login.
    pub async fn salesperson_for_login(&self, login: &str) -> SyncResult<Option<CorrelationEntry>> {
        Ok(self.repo.salesperson_for_login(login).await?)
    }

    /// Refreshes the cached backend id of every link that has a local key.
    ///
    /// Links whose local key has no correlation row keep `external_id =
    /// None`; their kinds are returned so validation can name them.
    pub async fn refresh_links(&self, sub: &mut Subscriber) -> SyncResult<Vec<CorrelationKind>> {
        let mut unresolved = Vec::new();
        for kind in CorrelationKind::ALL {
            let Some(local_id) = sub.links.local_id(kind).map(str::to_string) else {
                continue;
            };
            let external_id = self.to_external(kind, &local_id).await?;
            if external_id.is_none() {
                unresolved.push(kind);
            }
            *sub.links.slot_mut(kind) = Some(CorrelatedLink {
                local_id,
                external_id,
            });
        }
        Ok(unresolved)
    }

    /// Resolves every link a detail record references.
    ///
    /// A salesperson id unknown locally falls back to a lookup by the
    /// record's `salesperson_name`.
    pub async fn resolve_detail_links(
        &self,
        detail: &Value,
    ) -> SyncResult<HashMap<CorrelationKind, CorrelatedLink>> {
        let mut links = HashMap::new();
        for (kind, external_id) in mapper::detail_link_ids(detail) {
            match self.to_local(kind, external_id).await? {
                Some(link) => {
                    links.insert(kind, link);
                }
                None => debug!(kind = %kind, external_id, "No local correlation for remote id"),
            }
        }

        if !links.contains_key(&CorrelationKind::Salesperson) {
            if let Some(name) = mapper::detail_salesperson_name(detail) {
                if let Some(entry) = self.repo.salesperson_by_name(&name).await? {
                    links.insert(CorrelationKind::Salesperson, entry.as_link());
                }
            }
        }

        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_db::{Database, DbConfig};
    use serde_json::json;

    async fn resolver() -> (Database, CorrelationResolver) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let resolver = CorrelationResolver::new(db.correlations(), 24);
        (db, resolver)
    }

    #[tokio::test]
    async fn test_refresh_links_reports_unresolved() {
        let (db, resolver) = resolver().await;
        db.correlations()
            .upsert(&CorrelationEntry::new(CorrelationKind::Plan, "FIBER-100", 77))
            .await
            .unwrap();

        let mut sub = Subscriber::new("alice", "alice");
        sub.links.plan = Some(CorrelatedLink::local("FIBER-100"));
        sub.links.nas = Some(CorrelatedLink::local("NAS-UNKNOWN"));

        let unresolved = resolver.refresh_links(&mut sub).await.unwrap();
        assert_eq!(unresolved, vec![CorrelationKind::Nas]);
        assert_eq!(sub.links.external_id(CorrelationKind::Plan), Some(77));
    }

    #[tokio::test]
    async fn test_detail_links_fall_back_to_salesperson_name() {
        let (db, resolver) = resolver().await;
        let mut sp = CorrelationEntry::new(CorrelationKind::Salesperson, "SP-1", 501);
        sp.display_name = Some("Sales One".into());
        db.correlations().upsert(&sp).await.unwrap();
        db.correlations()
            .upsert(&CorrelationEntry::new(CorrelationKind::Nas, "NAS-1", 9))
            .await
            .unwrap();

        let detail = json!({
            "nas_id": 9,
            "salesperson_id": 999,
            "salesperson_name": "Sales One",
            "ip_pool_id": 4,
        });
        let links = resolver.resolve_detail_links(&detail).await.unwrap();

        assert_eq!(links[&CorrelationKind::Nas].local_id, "NAS-1");
        assert_eq!(links[&CorrelationKind::Salesperson].external_id, Some(501));
        assert!(!links.contains_key(&CorrelationKind::IpPool));
    }
}
