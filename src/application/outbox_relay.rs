//! Drains a participant's outbox table into the broker.
//!
//! The relay is the only publisher. Rows are sent strictly in `seq` order;
//! the first failure ends the pass so no later row (possibly for the same
//! order) overtakes it. A row is marked sent only after the broker acked it.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use super::run_blocking;
use crate::domain::errors::DomainError;
use crate::domain::ports::{EventPublisher, OutboxStore};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub batch_size: i64,
    pub poll_interval: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
        }
    }
}

pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Publish up to one batch of pending rows. Returns how many were sent,
    /// or the error that stopped the pass.
    pub async fn relay_batch(&self) -> Result<usize, DomainError> {
        let store = self.store.clone();
        let limit = self.config.batch_size;
        let pending = run_blocking(move || store.pending(limit)).await?;

        let mut sent = 0;
        for record in pending {
            let message = record.message;
            let payload = serde_json::to_vec(&message.payload)
                .map_err(|e| DomainError::Storage(format!("cannot encode outbox row: {e}")))?;

            if let Err(e) = self
                .publisher
                .publish(&message.topic, &message.key, &payload)
                .await
            {
                warn!(
                    "Failed to publish outbox row {} to {} (attempt {}): {e}",
                    message.id,
                    message.topic,
                    record.attempts + 1
                );
                let store = self.store.clone();
                let reason = e.to_string();
                let id = message.id;
                if let Err(db) = run_blocking(move || store.record_failure(id, &reason)).await {
                    warn!("Could not record failure for outbox row {id}: {db}");
                }
                return Err(e);
            }

            let store = self.store.clone();
            let id = message.id;
            run_blocking(move || store.mark_sent(id)).await?;
            debug!("Relayed outbox row {} to {}", message.id, message.topic);
            sent += 1;
        }
        Ok(sent)
    }

    /// Runs for the life of the process.
    pub async fn run(self) {
        info!("Outbox relay started");
        let mut backoff = self.config.initial_backoff;
        loop {
            match self.relay_batch().await {
                Ok(sent) => {
                    backoff = self.config.initial_backoff;
                    if sent as i64 >= self.config.batch_size {
                        continue;
                    }
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(e) => {
                    warn!("Outbox relay pass failed, retrying in {backoff:?}: {e}");
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff, self.config.max_backoff);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::domain::events::OutboxMessage;
    use crate::infrastructure::memory::{InMemoryBroker, InMemoryOutbox};

    fn message(order_id: Uuid, n: i32) -> OutboxMessage {
        OutboxMessage::new("order.created", order_id, &serde_json::json!({ "n": n })).unwrap()
    }

    fn relay(outbox: &InMemoryOutbox, broker: &InMemoryBroker) -> OutboxRelay {
        OutboxRelay::new(
            Arc::new(outbox.clone()),
            Arc::new(broker.clone()),
            RelayConfig::default(),
        )
    }

    #[tokio::test]
    async fn publishes_in_order_and_marks_sent() {
        let outbox = InMemoryOutbox::default();
        let broker = InMemoryBroker::default();
        let order_id = Uuid::new_v4();
        for n in 0..3 {
            outbox.push(message(order_id, n));
        }

        assert_eq!(relay(&outbox, &broker).relay_batch().await.unwrap(), 3);

        let published = broker.published();
        let ns: Vec<i64> = published
            .iter()
            .map(|m| m.json()["n"].as_i64().unwrap())
            .collect();
        assert_eq!(ns, vec![0, 1, 2]);
        assert!(published.iter().all(|m| m.key == order_id.to_string()));
        assert!(outbox.pending(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn broker_failure_leaves_row_unsent_and_stops_the_pass() {
        let outbox = InMemoryOutbox::default();
        let broker = InMemoryBroker::default();
        let order_id = Uuid::new_v4();
        outbox.push(message(order_id, 0));
        outbox.push(message(order_id, 1));

        broker.fail_next(1);
        let relay = relay(&outbox, &broker);
        assert!(matches!(relay.relay_batch().await, Err(DomainError::Broker(_))));
        assert!(broker.published().is_empty());
        let pending = outbox.pending(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].attempts, 1);

        assert_eq!(relay.relay_batch().await.unwrap(), 2);
        assert_eq!(broker.published()[0].json()["n"], 0);
        assert!(outbox.pending(10).unwrap().is_empty());
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let max = Duration::from_secs(1);
        assert_eq!(
            next_backoff(Duration::from_millis(300), max),
            Duration::from_millis(600)
        );
        assert_eq!(next_backoff(Duration::from_millis(800), max), max);
    }
}
