//! Process wiring shared by the three participant binaries.

use std::io;
use std::sync::Arc;

use diesel_migrations::EmbeddedMigrations;
use log::info;

use crate::application::consumer::EventDispatcher;
use crate::application::outbox_relay::OutboxRelay;
use crate::config::{Config, ServiceDefaults};
use crate::db::{create_pool, DbPool};
use crate::domain::ports::EventHandler;
use crate::handlers::RequestDeadline;
use crate::infrastructure::kafka::{run_consumer, subscribe, KafkaPublisher};
use crate::infrastructure::outbox_repo::DieselOutboxStore;
use crate::run_migrations;

fn startup_error(context: &str, e: impl std::fmt::Display) -> io::Error {
    io::Error::other(format!("{context}: {e}"))
}

/// A participant's configuration, migrated database and broker connection.
pub struct Participant {
    pub config: Config,
    pub pool: DbPool,
    publisher: Arc<KafkaPublisher>,
}

impl Participant {
    pub fn start(defaults: ServiceDefaults, migrations: EmbeddedMigrations) -> io::Result<Self> {
        let config = Config::from_env(defaults).map_err(|e| startup_error("configuration", e))?;
        let pool = create_pool(&config.database_url)
            .map_err(|e| startup_error("database connection", e))?;
        run_migrations(&pool, migrations).map_err(|e| startup_error("migrations", e))?;
        let publisher = KafkaPublisher::new(&config.kafka_brokers, config.request_timeout)
            .map_err(|e| startup_error("kafka producer", e))?;
        info!(
            "{}-service configured (brokers {}, group {})",
            defaults.name, config.kafka_brokers, config.consumer_group
        );

        Ok(Self {
            config,
            pool,
            publisher: Arc::new(publisher),
        })
    }

    pub fn deadline(&self) -> RequestDeadline {
        RequestDeadline(self.config.request_timeout)
    }

    /// Start draining this participant's outbox in the background.
    pub fn spawn_relay(&self) {
        let relay = OutboxRelay::new(
            Arc::new(DieselOutboxStore::new(self.pool.clone())),
            self.publisher.clone(),
            self.config.relay(),
        );
        tokio::spawn(relay.run());
    }

    /// Subscribe `handler` to its topics and consume in the background.
    pub fn spawn_consumer(&self, handler: Arc<dyn EventHandler>) -> io::Result<()> {
        let topics = handler.topics();
        let consumer = subscribe(
            &self.config.kafka_brokers,
            &self.config.consumer_group,
            &topics,
        )
        .map_err(|e| startup_error("kafka consumer", e))?;
        let dispatcher =
            EventDispatcher::new(handler, self.publisher.clone(), self.config.retry_policy());
        tokio::spawn(run_consumer(consumer, dispatcher));
        Ok(())
    }
}
