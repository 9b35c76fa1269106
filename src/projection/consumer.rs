//! Projection Consumer
//!
//! Single sequential loop per consumer-group member: poll, decode, apply,
//! ack. Nothing a message does can stop the loop. Undecodable messages and
//! messages that keep failing are parked on the dead-letter path.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::transport::{decode_event, Delivery, EventSubscription, TransportError};

use super::{ApplyOutcome, ReadModel};

/// Consumer tuning
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Max deliveries per poll
    pub batch_size: usize,
    /// Apply attempts before a message is dead-lettered
    pub max_attempts: u32,
    /// Base delay between apply attempts, multiplied by the attempt number
    pub retry_backoff: Duration,
    /// Pause after an empty poll or a transport error
    pub idle_wait: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_attempts: 5,
            retry_backoff: Duration::from_millis(100),
            idle_wait: Duration::from_millis(500),
        }
    }
}

/// Counts from one processed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub applied: usize,
    pub duplicates: usize,
    pub dead_lettered: usize,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.applied + self.duplicates + self.dead_lettered
    }
}

enum Disposition {
    Done(ApplyOutcome),
    DeadLetter(String),
}

/// Folds transport deliveries into a read model
pub struct ProjectionConsumer<S, R: ?Sized> {
    subscription: S,
    read_model: Arc<R>,
    config: ConsumerConfig,
}

impl<S, R> ProjectionConsumer<S, R>
where
    S: EventSubscription,
    R: ReadModel + ?Sized,
{
    pub fn new(subscription: S, read_model: Arc<R>, config: ConsumerConfig) -> Self {
        Self {
            subscription,
            read_model,
            config,
        }
    }

    /// Consume until `shutdown` resolves. An in-flight batch may be cut
    /// short; its unacked deliveries come back on the next start.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            "Projection consumer started"
        );

        tokio::pin!(shutdown);

        loop {
            let idle = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                result = self.process_batch() => match result {
                    Ok(report) if report.total() == 0 => true,
                    Ok(report) => {
                        tracing::debug!(
                            applied = report.applied,
                            duplicates = report.duplicates,
                            dead_lettered = report.dead_lettered,
                            "Batch processed"
                        );
                        false
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Poll failed; backing off");
                        true
                    }
                },
            };

            if idle {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(self.config.idle_wait) => {}
                }
            }
        }

        tracing::info!("Projection consumer stopped");
    }

    /// Poll once and handle every delivery in the batch.
    ///
    /// # Errors
    ///
    /// Only a failed poll is an error. Per-message failures are logged and
    /// routed, never returned.
    pub async fn process_batch(&mut self) -> Result<BatchReport, TransportError> {
        let deliveries = self.subscription.poll(self.config.batch_size).await?;
        let mut report = BatchReport::default();

        for delivery in &deliveries {
            match Self::handle(&self.read_model, &self.config, delivery).await {
                Disposition::Done(ApplyOutcome::Applied) => report.applied += 1,
                Disposition::Done(ApplyOutcome::Duplicate) => report.duplicates += 1,
                Disposition::DeadLetter(reason) => {
                    report.dead_lettered += 1;
                    if let Err(e) = self.subscription.dead_letter(delivery, &reason).await {
                        tracing::error!(
                            message_id = %delivery.id,
                            error = %e,
                            "Dead-lettering failed; message stays pending"
                        );
                    }
                    continue;
                }
            }

            if let Err(e) = self.subscription.ack(delivery).await {
                // Redelivery is harmless: the read model dedups by event id
                tracing::error!(message_id = %delivery.id, error = %e, "Ack failed");
            }
        }

        Ok(report)
    }

    async fn handle(read_model: &Arc<R>, config: &ConsumerConfig, delivery: &Delivery) -> Disposition {
        let event = match decode_event(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    message_id = %delivery.id,
                    key = %delivery.key,
                    error = %e,
                    "Undecodable event"
                );
                return Disposition::DeadLetter(format!("decode: {e}"));
            }
        };

        let mut last_error = String::new();
        for attempt in 1..=config.max_attempts {
            match read_model.apply(&event).await {
                Ok(outcome) => return Disposition::Done(outcome),
                Err(e) => {
                    tracing::warn!(
                        message_id = %delivery.id,
                        event_id = %event.event_id(),
                        attempt,
                        error = %e,
                        "Projection apply failed"
                    );
                    last_error = e.to_string();
                    if attempt < config.max_attempts {
                        tokio::time::sleep(config.retry_backoff * attempt).await;
                    }
                }
            }
        }

        Disposition::DeadLetter(format!(
            "apply failed after {} attempts: {last_error}",
            config.max_attempts
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Account;
    use crate::domain::{AccountEvent, AccountId, Amount};
    use crate::projection::{InMemoryReadModel, ProjectionError};
    use crate::transport::{encode_event, EventPublisher, InMemoryTransport};
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    fn id(s: &str) -> AccountId {
        AccountId::new(s).unwrap()
    }

    fn fast_config() -> ConsumerConfig {
        ConsumerConfig {
            batch_size: 16,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(1),
            idle_wait: Duration::from_millis(1),
        }
    }

    /// Fails the first `failures` applies, then delegates
    struct FlakyReadModel {
        inner: InMemoryReadModel,
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ReadModel for FlakyReadModel {
        async fn apply(&self, event: &AccountEvent) -> Result<ApplyOutcome, ProjectionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ProjectionError::Unavailable("flaky".into()));
            }
            self.inner.apply(event).await
        }

        async fn balance(&self, account_id: &AccountId) -> Result<Option<Decimal>, ProjectionError> {
            self.inner.balance(account_id).await
        }

        async fn overwrite(&self, account: &Account, ids: &[Uuid]) -> Result<(), ProjectionError> {
            self.inner.overwrite(account, ids).await
        }
    }

    #[tokio::test]
    async fn test_bad_payload_does_not_block_later_messages() {
        let transport = InMemoryTransport::new();
        transport.publish_raw("a", "not json").await;
        transport
            .publish(&AccountEvent::deposited(id("a"), Amount::new(dec!(3)).unwrap(), Utc::now()))
            .await
            .unwrap();

        let read_model = Arc::new(InMemoryReadModel::new());
        let subscription = transport.subscribe("projection", "c1").await;
        let mut consumer = ProjectionConsumer::new(subscription, read_model.clone(), fast_config());

        let report = consumer.process_batch().await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(read_model.balance(&id("a")).await.unwrap(), Some(dec!(3)));

        let dead = transport.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].delivery.payload, "not json");

        // everything settled, nothing comes back
        assert_eq!(consumer.process_batch().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_transient_apply_failure_is_retried() {
        let transport = InMemoryTransport::new();
        transport.publish(&AccountEvent::created(id("a"), Utc::now())).await.unwrap();

        let read_model = Arc::new(FlakyReadModel {
            inner: InMemoryReadModel::new(),
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let subscription = transport.subscribe("projection", "c1").await;
        let mut consumer = ProjectionConsumer::new(subscription, read_model.clone(), fast_config());

        let report = consumer.process_batch().await.unwrap();
        assert_eq!(report.applied, 1);
        assert!(transport.dead_letters().await.is_empty());
        assert_eq!(read_model.balance(&id("a")).await.unwrap(), Some(Decimal::ZERO));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_idle_wait() {
        let transport = InMemoryTransport::new();
        let subscription = transport.subscribe("projection", "c1").await;
        let consumer = ProjectionConsumer::new(
            subscription,
            Arc::new(InMemoryReadModel::new()),
            ConsumerConfig {
                idle_wait: Duration::from_secs(3600),
                ..fast_config()
            },
        );

        let handle = tokio::spawn(consumer.run(tokio::time::sleep(Duration::from_millis(20))));

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("consumer kept sleeping after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_persistent_apply_failure_is_dead_lettered() {
        let transport = InMemoryTransport::new();
        transport.publish(&AccountEvent::created(id("a"), Utc::now())).await.unwrap();

        let read_model = Arc::new(FlakyReadModel {
            inner: InMemoryReadModel::new(),
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let subscription = transport.subscribe("projection", "c1").await;
        let mut consumer = ProjectionConsumer::new(subscription, read_model.clone(), fast_config());

        let report = consumer.process_batch().await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(read_model.calls.load(Ordering::SeqCst), 3);
        assert!(transport.dead_letters().await[0].reason.contains("3 attempts"));
    }

    #[tokio::test]
    async fn test_duplicate_delivery_counts_once() {
        let transport = InMemoryTransport::new();
        let deposit = AccountEvent::deposited(id("a"), Amount::new(dec!(10)).unwrap(), Utc::now());
        let payload = encode_event(&deposit).unwrap();
        transport.publish_raw("a", payload.clone()).await;
        transport.publish_raw("a", payload).await;

        let read_model = Arc::new(InMemoryReadModel::new());
        let subscription = transport.subscribe("projection", "c1").await;
        let mut consumer = ProjectionConsumer::new(subscription, read_model.clone(), fast_config());

        let report = consumer.process_batch().await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(read_model.balance(&id("a")).await.unwrap(), Some(dec!(10)));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let transport = InMemoryTransport::new();
        transport.publish(&AccountEvent::created(id("a"), Utc::now())).await.unwrap();

        let read_model = Arc::new(InMemoryReadModel::new());
        let subscription = transport.subscribe("projection", "c1").await;
        let consumer = ProjectionConsumer::new(subscription, read_model.clone(), fast_config());

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(consumer.run(async {
            let _ = rx.await;
        }));

        for _ in 0..100 {
            if read_model.balance(&id("a")).await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(read_model.balance(&id("a")).await.unwrap(), Some(Decimal::ZERO));
    }
}
