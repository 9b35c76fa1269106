//! In-process transport with consumer groups, for tests and local runs.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::AccountEvent;

use super::{encode_event, Delivery, EventPublisher, EventSubscription, TransportError};

/// A message parked by a consumer group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub group: String,
    pub delivery: Delivery,
    pub reason: String,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Index of the next never-delivered message
    next: usize,
    /// Delivered but unacked message indexes, per consumer
    pending: HashMap<String, BTreeSet<usize>>,
}

#[derive(Debug, Default)]
struct State {
    messages: Vec<(String, String)>,
    groups: HashMap<String, GroupState>,
    dead_letters: Vec<DeadLetter>,
}

/// Ordered, append-only message list shared by publishers and subscriptions
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<State>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an arbitrary payload, bypassing the event codec
    pub async fn publish_raw(&self, key: impl Into<String>, payload: impl Into<String>) {
        self.state
            .lock()
            .await
            .messages
            .push((key.into(), payload.into()));
    }

    /// Join (creating if needed) a consumer group. New groups start at the
    /// beginning of the stream.
    pub async fn subscribe(
        &self,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> InMemorySubscription {
        let group = group.into();
        self.state.lock().await.groups.entry(group.clone()).or_default();

        InMemorySubscription {
            state: self.state.clone(),
            group,
            consumer: consumer.into(),
        }
    }

    /// Every payload published so far, in order
    pub async fn published(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .messages
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }
}

#[async_trait]
impl EventPublisher for InMemoryTransport {
    async fn publish(&self, event: &AccountEvent) -> Result<(), TransportError> {
        let payload = encode_event(event)?;
        self.publish_raw(event.account_id().as_str(), payload).await;
        Ok(())
    }
}

/// A consumer-group member over an [`InMemoryTransport`]
#[derive(Debug)]
pub struct InMemorySubscription {
    state: Arc<Mutex<State>>,
    group: String,
    consumer: String,
}

impl InMemorySubscription {
    fn parse_id(id: &str) -> Result<usize, TransportError> {
        id.parse()
            .map_err(|_| TransportError::UnknownDelivery(id.to_string()))
    }

    fn settle(state: &mut State, group: &str, consumer: &str, idx: usize) -> bool {
        state
            .groups
            .get_mut(group)
            .and_then(|g| g.pending.get_mut(consumer))
            .is_some_and(|pending| pending.remove(&idx))
    }
}

#[async_trait]
impl EventSubscription for InMemorySubscription {
    async fn poll(&mut self, max: usize) -> Result<Vec<Delivery>, TransportError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let group = state.groups.entry(self.group.clone()).or_default();
        let pending = group.pending.entry(self.consumer.clone()).or_default();

        let mut indexes: Vec<usize> = pending.iter().copied().take(max).collect();

        while indexes.len() < max && group.next < state.messages.len() {
            pending.insert(group.next);
            indexes.push(group.next);
            group.next += 1;
        }

        Ok(indexes
            .into_iter()
            .map(|idx| {
                let (key, payload) = &state.messages[idx];
                Delivery {
                    id: idx.to_string(),
                    key: key.clone(),
                    payload: payload.clone(),
                }
            })
            .collect())
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), TransportError> {
        let idx = Self::parse_id(&delivery.id)?;
        let mut state = self.state.lock().await;
        Self::settle(&mut state, &self.group, &self.consumer, idx);
        Ok(())
    }

    async fn dead_letter(
        &mut self,
        delivery: &Delivery,
        reason: &str,
    ) -> Result<(), TransportError> {
        let idx = Self::parse_id(&delivery.id)?;
        let mut state = self.state.lock().await;

        state.dead_letters.push(DeadLetter {
            group: self.group.clone(),
            delivery: delivery.clone(),
            reason: reason.to_string(),
        });
        Self::settle(&mut state, &self.group, &self.consumer, idx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountId;
    use chrono::Utc;

    async fn publish_n(transport: &InMemoryTransport, n: usize) {
        for i in 0..n {
            let id = AccountId::new(format!("acc-{i}")).unwrap();
            transport.publish(&AccountEvent::created(id, Utc::now())).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_unacked_messages_are_redelivered() {
        let transport = InMemoryTransport::new();
        publish_n(&transport, 3).await;

        let mut sub = transport.subscribe("g", "c1").await;
        let first = sub.poll(2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].key, "acc-0");

        sub.ack(&first[0]).await.unwrap();

        // acc-1 was never acked, so it comes back before acc-2
        let second = sub.poll(10).await.unwrap();
        let keys: Vec<_> = second.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["acc-1", "acc-2"]);
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let transport = InMemoryTransport::new();
        publish_n(&transport, 2).await;

        let mut a = transport.subscribe("projection", "c").await;
        let mut b = transport.subscribe("audit", "c").await;

        assert_eq!(a.poll(10).await.unwrap().len(), 2);
        assert_eq!(b.poll(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_members_of_one_group_share_the_stream() {
        let transport = InMemoryTransport::new();
        publish_n(&transport, 2).await;

        let mut c1 = transport.subscribe("g", "c1").await;
        let mut c2 = transport.subscribe("g", "c2").await;

        let got1 = c1.poll(1).await.unwrap();
        let got2 = c2.poll(10).await.unwrap();
        assert_eq!(got1[0].key, "acc-0");
        assert_eq!(got2.len(), 1);
        assert_eq!(got2[0].key, "acc-1");
    }

    #[tokio::test]
    async fn test_dead_letter_acks() {
        let transport = InMemoryTransport::new();
        transport.publish_raw("k", "garbage").await;

        let mut sub = transport.subscribe("g", "c").await;
        let batch = sub.poll(10).await.unwrap();
        sub.dead_letter(&batch[0], "undecodable").await.unwrap();

        assert!(sub.poll(10).await.unwrap().is_empty());
        let parked = transport.dead_letters().await;
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].reason, "undecodable");
        assert_eq!(parked[0].delivery.payload, "garbage");
    }

    #[tokio::test]
    async fn test_ack_unknown_id() {
        let transport = InMemoryTransport::new();
        let mut sub = transport.subscribe("g", "c").await;
        let bogus = Delivery {
            id: "not-a-number".into(),
            key: "k".into(),
            payload: String::new(),
        };
        assert!(matches!(
            sub.ack(&bogus).await,
            Err(TransportError::UnknownDelivery(_))
        ));
    }
}
