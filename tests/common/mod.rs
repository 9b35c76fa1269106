//! Common test utilities
//!
//! The full service stack over in-memory backends.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use event_ledger::api::{self, AppState};
use event_ledger::cache::InMemoryAccountCache;
use event_ledger::event_log::{BlobEventLog, InMemoryBlobStore};
use event_ledger::handlers::{AccountService, ServiceConfig};
use event_ledger::projection::{ConsumerConfig, InMemoryReadModel, ProjectionConsumer};
use event_ledger::transport::InMemoryTransport;

pub const PROJECTION_GROUP: &str = "projection-group";

pub struct TestStack {
    pub service: Arc<AccountService>,
    pub log: Arc<BlobEventLog<InMemoryBlobStore>>,
    pub cache: Arc<InMemoryAccountCache>,
    pub transport: InMemoryTransport,
    pub read_model: Arc<InMemoryReadModel>,
}

impl TestStack {
    pub fn new() -> Self {
        let log = Arc::new(BlobEventLog::new(InMemoryBlobStore::new()));
        let cache = Arc::new(InMemoryAccountCache::new());
        let transport = InMemoryTransport::new();

        let service = AccountService::new(
            log.clone(),
            cache.clone(),
            Arc::new(transport.clone()),
            ServiceConfig {
                cache_ttl: Duration::from_secs(60),
                io_timeout: Duration::from_secs(1),
            },
        );

        Self {
            service: Arc::new(service),
            log,
            cache,
            transport,
            read_model: Arc::new(InMemoryReadModel::new()),
        }
    }

    /// Router with the same middleware as the server
    pub fn app(&self) -> Router {
        api::build_app(AppState::new(self.service.clone(), self.read_model.clone()))
    }

    /// Run the projection until the transport has nothing left for it.
    /// Returns the number of deliveries handled.
    pub async fn drain_projection(&self) -> usize {
        let subscription = self.transport.subscribe(PROJECTION_GROUP, "test-consumer").await;
        let mut consumer = ProjectionConsumer::new(
            subscription,
            self.read_model.clone(),
            ConsumerConfig {
                batch_size: 8,
                max_attempts: 2,
                retry_backoff: Duration::from_millis(1),
                idle_wait: Duration::from_millis(1),
            },
        );

        let mut handled = 0;
        loop {
            let report = consumer.process_batch().await.expect("in-memory poll cannot fail");
            if report.total() == 0 {
                return handled;
            }
            handled += report.total();
        }
    }
}
