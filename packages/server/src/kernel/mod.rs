// Kernel - core infrastructure with dependency injection
//
// ServiceDeps holds every backing store and engine the server needs and is
// passed explicitly to routes, workers and the scheduler: no hidden global
// state.
//
// IMPORTANT: the kernel is infrastructure only; handler business logic
// lives behind the JobHandler boundary.

pub mod documents;
pub mod handlers;
pub mod jobs;
pub mod kv;
pub mod metrics;
pub mod scheduler;
pub mod subscriptions;
pub mod tenants;

use anyhow::{Context, Result};
use mongodb::bson::doc;
use mongodb::Database;
use std::sync::Arc;

use crate::config::Config;
use jobs::{
    EventBus, HandlerRegistry, JobStore, QueueManager, RetentionPolicy, TrackerService,
};
use kv::KvPool;
use metrics::Metrics;
use scheduler::ScheduleStore;
use subscriptions::{SubscriptionFanout, SubscriptionStore};
use tenants::TenantRegistry;

pub use jobs::Job;
pub use tenants::Identity;

/// Process-wide dependencies, connected once at startup.
pub struct ServiceDeps {
    pub config: Arc<Config>,
    pub kv: Arc<KvPool>,
    pub documents: Database,
    pub manager: Arc<QueueManager>,
    pub registry: Arc<HandlerRegistry>,
    pub tenants: Arc<TenantRegistry>,
    pub subscriptions: Arc<SubscriptionStore>,
    pub fanout: Arc<SubscriptionFanout>,
    pub schedules: Arc<ScheduleStore>,
    pub tracker: Arc<TrackerService>,
    pub metrics: Arc<Metrics>,
    pub http: reqwest::Client,
}

impl ServiceDeps {
    /// Connect every backing store and assemble the engines.
    pub async fn connect(config: Config) -> Result<Arc<Self>> {
        let config = Arc::new(config);

        let metrics = Arc::new(Metrics::new().context("failed to build metrics registry")?);
        let kv = Arc::new(KvPool::connect(&config, 4).await?);
        let documents = documents::connect(&config).await?;
        let http = reqwest::Client::new();

        let store = JobStore::new(kv.manager(), RetentionPolicy::from_config(&config));
        let bus = EventBus::new();
        let manager = Arc::new(QueueManager::new(
            store,
            bus,
            config.clone(),
            metrics.clone(),
        ));
        manager
            .load_known_queues()
            .await
            .context("failed to reconcile known queues")?;

        let tenants = Arc::new(TenantRegistry::new(&documents, &config));
        let subscriptions = Arc::new(SubscriptionStore::new(&documents));
        let fanout = Arc::new(SubscriptionFanout::new(
            subscriptions.clone(),
            http.clone(),
            metrics.clone(),
        ));
        let schedules = Arc::new(ScheduleStore::new(&documents));

        let registry = Arc::new(HandlerRegistry::new(config.max_workers_per_queue));
        handlers::register_builtin_handlers(&registry, &config, schedules.clone(), http.clone())
            .context("failed to register builtin handlers")?;

        let tracker = Arc::new(TrackerService::new(manager.clone()));

        Ok(Arc::new(Self {
            config,
            kv,
            documents,
            manager,
            registry,
            tenants,
            subscriptions,
            fanout,
            schedules,
            tracker,
            metrics,
            http,
        }))
    }

    /// Liveness probe against the KV store.
    pub async fn ping_kv(&self) -> Result<()> {
        let mut conn = self.kv.manager();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Liveness probe against the document store.
    pub async fn ping_documents(&self) -> Result<()> {
        self.documents.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}
