//! # Engine
//!
//! Wires every component to one gateway, one ledger and one scheduler.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               Engine                                    │
//! │                                                                         │
//! │  RemoteGateway ──► RemoteApi (interactive timeout)                     │
//! │                └─► RemoteApi (bulk timeout) ──► bulk DetailReconciler   │
//! │                                                                         │
//! │  SubscriberService ──► Provisioner ──► DocumentSynchronizer             │
//! │  ListReconciler / DetailReconciler ──► CorrelationResolver              │
//! │  SubscriberActions ──► JobScheduler (QueueScheduler by default)         │
//! │                                                                         │
//! │  job_worker() ──► JobWorker + JobWorkerHandle (spawn with tokio)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use ledger_db::Database;

use crate::actions::SubscriberActions;
use crate::config::EngineConfig;
use crate::correlation::CorrelationResolver;
use crate::detail_reconciler::DetailReconciler;
use crate::documents::DocumentSynchronizer;
use crate::error::SyncResult;
use crate::gateway::RemoteGateway;
use crate::jobs::{JobRunner, JobScheduler, JobWorker, JobWorkerHandle, QueueScheduler};
use crate::lifecycle::SubscriberService;
use crate::list_reconciler::ListReconciler;
use crate::remote::RemoteApi;
use crate::saga::{ProvisionSettings, Provisioner};

#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    db: Database,
    api: RemoteApi,
    service: SubscriberService,
    list: ListReconciler,
    details: DetailReconciler,
    bulk_details: DetailReconciler,
    documents: DocumentSynchronizer,
    actions: SubscriberActions,
}

impl Engine {
    /// Builds an engine that queues jobs in the ledger.
    pub fn from_config(config: EngineConfig, db: Database) -> SyncResult<Self> {
        let scheduler: Arc<dyn JobScheduler> = Arc::new(QueueScheduler::new(db.jobs()));
        Self::with_scheduler(config, db, scheduler)
    }

    /// Builds an engine around a caller-supplied scheduler.
    pub fn with_scheduler(
        config: EngineConfig,
        db: Database,
        scheduler: Arc<dyn JobScheduler>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let api = RemoteApi::new(RemoteGateway::from_config(&config)?);
        let bulk_api = api.with_timeout(config.remote.bulk_timeout());

        let correlations = CorrelationResolver::new(
            db.correlations(),
            config.sync.correlation_max_staleness_hours,
        );
        let documents = DocumentSynchronizer::new(api.clone(), db.clone());
        let provisioner = Provisioner::new(
            api.clone(),
            db.clone(),
            correlations.clone(),
            documents.clone(),
            ProvisionSettings::from_config(&config)?,
        );
        let service = SubscriberService::new(db.clone(), correlations.clone(), provisioner);

        let list = ListReconciler::new(bulk_api.clone(), db.clone());
        let details = DetailReconciler::new(
            api.clone(),
            db.clone(),
            correlations,
            documents.clone(),
            config.sync.detail_checkpoint_every,
        );
        let bulk_details = details.with_api(bulk_api);

        let actions = SubscriberActions::new(
            api.clone(),
            db.clone(),
            details.clone(),
            list.clone(),
            scheduler,
            config.jobs.clone(),
        );

        Ok(Engine {
            config,
            db,
            api,
            service,
            list,
            details,
            bulk_details,
            documents,
            actions,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn api(&self) -> &RemoteApi {
        &self.api
    }

    /// Create / save / delete / retry entry points.
    pub fn subscribers(&self) -> &SubscriberService {
        &self.service
    }

    pub fn list_reconciler(&self) -> &ListReconciler {
        &self.list
    }

    pub fn detail_reconciler(&self) -> &DetailReconciler {
        &self.details
    }

    /// Detail reconciler on the bulk timeout profile.
    pub fn bulk_detail_reconciler(&self) -> &DetailReconciler {
        &self.bulk_details
    }

    pub fn documents(&self) -> &DocumentSynchronizer {
        &self.documents
    }

    pub fn actions(&self) -> &SubscriberActions {
        &self.actions
    }

    /// Creates a worker for the ledger's job queue. Spawn `worker.run()`.
    pub fn job_worker(&self) -> (JobWorker, JobWorkerHandle) {
        let runner = JobRunner::new(
            self.list.clone(),
            self.details.clone(),
            self.bulk_details.clone(),
        );
        JobWorker::new(
            self.db.jobs(),
            runner,
            Duration::from_secs(self.config.jobs.poll_interval_secs.max(1)),
            self.config.jobs.max_attempts,
        )
    }
}
