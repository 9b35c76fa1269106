//! Redis Streams-backed transport (durable, at-least-once delivery).
//!
//! - **Stream key**: one stream for all account events (`account-events`)
//! - **Consumer groups**: one per consumer type (e.g. `projection-group`)
//! - **Redelivery**: a member re-reads its own pending entries (`0`) before
//!   asking for new ones (`>`): on start, after a failed ack, and every
//!   [`PENDING_RECHECK`]
//! - **Orphans**: entries idle in another member's pending list for
//!   [`CLAIM_MIN_IDLE`] are claimed with XCLAIM (that member likely crashed)
//! - **Dead-letter queue**: `account-events:dlq`

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamPendingCountReply, StreamPendingId, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, Client};
use std::time::{Duration, Instant};

use crate::domain::AccountEvent;

use super::{encode_event, Delivery, EventPublisher, EventSubscription, TransportError};

/// How often a member re-reads its own pending list
pub const PENDING_RECHECK: Duration = Duration::from_secs(30);

/// Idle time after which another member's pending entry is claimed
pub const CLAIM_MIN_IDLE: Duration = Duration::from_secs(60);

fn command_error(what: &str, e: redis::RedisError) -> TransportError {
    TransportError::Unavailable(format!("{what} failed: {e}"))
}

/// Publisher and subscription factory over a Redis stream
#[derive(Clone)]
pub struct RedisStreamsTransport {
    conn_manager: ConnectionManager,
    stream_key: String,
    dlq_key: String,
}

impl RedisStreamsTransport {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the first connection fails.
    pub async fn connect(
        redis_url: &str,
        stream_key: impl Into<String>,
        dlq_key: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let client = Client::open(redis_url).map_err(|e| command_error("Redis client", e))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| command_error("Redis connection", e))?;

        Ok(Self {
            conn_manager,
            stream_key: stream_key.into(),
            dlq_key: dlq_key.into(),
        })
    }

    /// Join a consumer group, creating group and stream if they do not exist.
    /// A new group starts from the beginning of the stream.
    pub async fn subscribe(
        &self,
        group: impl Into<String>,
        consumer: impl Into<String>,
        block: Duration,
    ) -> Result<RedisStreamsSubscription, TransportError> {
        let group = group.into();
        let mut conn = self.conn_manager.clone();

        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.stream_key, &group, "0")
            .await;
        match created {
            Ok(()) => tracing::info!(stream = %self.stream_key, group = %group, "Consumer group created"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(command_error("XGROUP CREATE", e)),
        }

        Ok(RedisStreamsSubscription {
            conn,
            stream_key: self.stream_key.clone(),
            dlq_key: self.dlq_key.clone(),
            group,
            consumer: consumer.into(),
            block_ms: block.as_millis() as usize,
            pending: PendingCheck::new(PENDING_RECHECK),
        })
    }
}

#[async_trait]
impl EventPublisher for RedisStreamsTransport {
    async fn publish(&self, event: &AccountEvent) -> Result<(), TransportError> {
        let payload = encode_event(event)?;
        let mut conn = self.conn_manager.clone();

        let message_id: String = conn
            .xadd(
                &self.stream_key,
                "*",
                &[
                    ("account_id", event.account_id().as_str()),
                    ("event_type", event.event_type().as_str()),
                    ("payload", payload.as_str()),
                ],
            )
            .await
            .map_err(|e| command_error("XADD", e))?;

        tracing::debug!(
            stream = %self.stream_key,
            message_id = %message_id,
            account_id = %event.account_id(),
            "Event published"
        );
        Ok(())
    }
}

/// One consumer-group member reading a Redis stream
pub struct RedisStreamsSubscription {
    conn: ConnectionManager,
    stream_key: String,
    dlq_key: String,
    group: String,
    consumer: String,
    block_ms: usize,
    pending: PendingCheck,
}

/// When the pending list has to be read instead of new entries
#[derive(Debug)]
struct PendingCheck {
    draining: bool,
    last_check: Instant,
    every: Duration,
}

impl PendingCheck {
    fn new(every: Duration) -> Self {
        Self {
            draining: true,
            last_check: Instant::now(),
            every,
        }
    }

    /// Start a pending pass if one is flagged or the recheck interval is up
    fn due(&mut self) -> bool {
        if !self.draining && self.last_check.elapsed() >= self.every {
            self.draining = true;
        }
        if self.draining {
            self.last_check = Instant::now();
        }
        self.draining
    }

    /// Nothing of ours is pending
    fn drained(&mut self) {
        self.draining = false;
    }

    /// An ack or dead-letter did not go through; the entry is still pending
    fn settle_failed(&mut self) {
        self.draining = true;
    }
}

/// Entries pending on other members for at least `min_idle_ms`
fn orphaned_ids(pending: Vec<StreamPendingId>, consumer: &str, min_idle_ms: usize) -> Vec<String> {
    pending
        .into_iter()
        .filter(|p| p.consumer != consumer && p.last_delivered_ms >= min_idle_ms)
        .map(|p| p.id)
        .collect()
}

impl RedisStreamsSubscription {
    async fn read(&mut self, start: &str, max: usize, block: bool) -> Result<Vec<Delivery>, TransportError> {
        let mut opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(max);
        if block {
            opts = opts.block(self.block_ms);
        }

        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[&self.stream_key], &[start], &opts)
            .await
            .map_err(|e| command_error("XREADGROUP", e))?;

        let deliveries = reply
            .map(|reply| {
                reply
                    .keys
                    .into_iter()
                    .flat_map(|key| key.ids)
                    .map(|entry| Delivery {
                        key: entry.get::<String>("account_id").unwrap_or_default(),
                        payload: entry.get::<String>("payload").unwrap_or_default(),
                        id: entry.id,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(deliveries)
    }

    /// Move long-idle entries of other members into this member's pending
    /// list, where the next `0` read picks them up
    async fn claim_orphans(&mut self, max: usize) -> Result<usize, TransportError> {
        let min_idle_ms = CLAIM_MIN_IDLE.as_millis() as usize;

        let reply: StreamPendingCountReply = self
            .conn
            .xpending_count(&self.stream_key, &self.group, "-", "+", max)
            .await
            .map_err(|e| command_error("XPENDING", e))?;

        let orphaned = orphaned_ids(reply.ids, &self.consumer, min_idle_ms);
        if orphaned.is_empty() {
            return Ok(0);
        }

        let claimed: StreamClaimReply = self
            .conn
            .xclaim(&self.stream_key, &self.group, &self.consumer, min_idle_ms, &orphaned[..])
            .await
            .map_err(|e| command_error("XCLAIM", e))?;

        tracing::warn!(
            group = %self.group,
            consumer = %self.consumer,
            count = claimed.ids.len(),
            "Claimed entries from idle consumers"
        );
        Ok(claimed.ids.len())
    }
}

#[async_trait]
impl EventSubscription for RedisStreamsSubscription {
    async fn poll(&mut self, max: usize) -> Result<Vec<Delivery>, TransportError> {
        if self.pending.due() {
            if let Err(e) = self.claim_orphans(max).await {
                tracing::warn!(group = %self.group, error = %e, "Orphan claim failed");
            }

            let pending = self.read("0", max, false).await?;
            if !pending.is_empty() {
                tracing::info!(
                    group = %self.group,
                    consumer = %self.consumer,
                    count = pending.len(),
                    "Redelivering pending entries"
                );
                return Ok(pending);
            }
            self.pending.drained();
        }

        self.read(">", max, true).await
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        let acked: redis::RedisResult<i64> = self
            .conn
            .xack(&self.stream_key, &self.group, &[&delivery.id])
            .await;

        match acked {
            Ok(_) => Ok(()),
            Err(e) => {
                self.pending.settle_failed();
                Err(command_error("XACK", e))
            }
        }
    }

    async fn dead_letter(
        &mut self,
        delivery: &Delivery,
        reason: &str,
    ) -> Result<(), TransportError> {
        let failed_at = chrono::Utc::now().to_rfc3339();

        let parked: redis::RedisResult<String> = self
            .conn
            .xadd(
                &self.dlq_key,
                "*",
                &[
                    ("original_message_id", delivery.id.as_str()),
                    ("group", self.group.as_str()),
                    ("account_id", delivery.key.as_str()),
                    ("reason", reason),
                    ("failed_at", failed_at.as_str()),
                    ("payload", delivery.payload.as_str()),
                ],
            )
            .await;
        if let Err(e) = parked {
            self.pending.settle_failed();
            return Err(command_error("DLQ XADD", e));
        }

        tracing::warn!(
            message_id = %delivery.id,
            dlq = %self.dlq_key,
            reason = %reason,
            "Message sent to dead-letter queue"
        );

        self.ack(delivery).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_id(id: &str, consumer: &str, idle_ms: usize) -> StreamPendingId {
        StreamPendingId {
            id: id.to_string(),
            consumer: consumer.to_string(),
            last_delivered_ms: idle_ms,
            times_delivered: 1,
        }
    }

    #[test]
    fn test_pending_list_is_read_again_after_failed_settle() {
        let mut check = PendingCheck::new(Duration::from_secs(3600));
        assert!(check.due());

        check.drained();
        assert!(!check.due());

        check.settle_failed();
        assert!(check.due());
    }

    #[test]
    fn test_pending_list_is_rechecked_periodically() {
        let mut check = PendingCheck::new(Duration::ZERO);
        check.drained();
        assert!(check.due());
    }

    #[test]
    fn test_only_idle_entries_of_other_members_are_orphans() {
        let pending = vec![
            pending_id("1-0", "me", 120_000),
            pending_id("2-0", "crashed", 120_000),
            pending_id("3-0", "busy", 10),
        ];

        assert_eq!(orphaned_ids(pending, "me", 60_000), vec!["2-0".to_string()]);
    }
}
