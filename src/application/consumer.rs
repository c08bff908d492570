//! What a participant does with one inbound message, independent of the
//! broker client that delivered it.
//!
//! Poison messages (undecodable, invalid, or about entities that do not
//! exist) are logged and dropped. Transient failures are retried in place;
//! once the attempts run out the raw message goes to `<topic>.dlq`. In every
//! case the caller commits the offset afterwards, never before.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use super::outbox_relay::next_backoff;
use super::run_blocking;
use crate::domain::events::dead_letter_topic;
use crate::domain::ports::{EventHandler, EventPublisher};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Handled,
    /// Poison message, dropped after logging.
    Discarded,
    DeadLettered,
}

pub struct EventDispatcher {
    handler: Arc<dyn EventHandler>,
    dead_letters: Arc<dyn EventPublisher>,
    policy: RetryPolicy,
}

impl EventDispatcher {
    pub fn new(
        handler: Arc<dyn EventHandler>,
        dead_letters: Arc<dyn EventPublisher>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            handler,
            dead_letters,
            policy,
        }
    }

    pub fn topics(&self) -> Vec<&'static str> {
        self.handler.topics()
    }

    /// Settle one message. Returns only once the message may be committed.
    pub async fn dispatch(&self, topic: &str, key: &str, payload: &[u8]) -> Disposition {
        info!("Received {topic} event (key {key})");
        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.initial_backoff;
        let mut attempt = 1;

        loop {
            let handler = self.handler.clone();
            let owned_topic = topic.to_string();
            let owned_payload = payload.to_vec();
            let result = run_blocking(move || handler.handle(&owned_topic, &owned_payload)).await;

            match result {
                Ok(()) => return Disposition::Handled,
                Err(e) if !e.is_retryable() => {
                    warn!("Discarding poison {topic} message (key {key}): {e}");
                    return Disposition::Discarded;
                }
                Err(e) if attempt >= max_attempts => {
                    error!("Giving up on {topic} message (key {key}) after {attempt} attempts: {e}");
                    self.dead_letter(topic, key, payload).await;
                    return Disposition::DeadLettered;
                }
                Err(e) => {
                    warn!(
                        "Attempt {attempt}/{max_attempts} for {topic} message (key {key}) failed, \
                         retrying in {backoff:?}: {e}"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff, self.policy.max_backoff);
                    attempt += 1;
                }
            }
        }
    }

    async fn dead_letter(&self, topic: &str, key: &str, payload: &[u8]) {
        let dlq = dead_letter_topic(topic);
        let mut backoff = self.policy.initial_backoff;
        // The offset must not move past a message that is in neither place.
        loop {
            match self.dead_letters.publish(&dlq, key, payload).await {
                Ok(()) => {
                    warn!("Moved {topic} message (key {key}) to {dlq}");
                    return;
                }
                Err(e) => {
                    error!("Could not dead-letter {topic} message (key {key}), retrying in {backoff:?}: {e}");
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff, self.policy.max_backoff);
                }
            }
        }
    }
}
