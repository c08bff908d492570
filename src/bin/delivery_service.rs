use std::sync::Arc;

use actix_web::web;
use dotenvy::dotenv;
use log::info;
use order_saga::application::delivery_scheduler::{ProgressScheduler, SchedulerHandle};
use order_saga::application::delivery_service::DeliveryService;
use order_saga::config::ServiceDefaults;
use order_saga::domain::ports::DeliveryRepository;
use order_saga::infrastructure::delivery_repo::DieselDeliveryRepository;
use order_saga::runtime::Participant;
use order_saga::{build_delivery_server, DELIVERY_MIGRATIONS};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let defaults = ServiceDefaults {
        name: "delivery",
        port: 8082,
    };
    let participant = Participant::start(defaults, DELIVERY_MIGRATIONS)?;

    let repo: Arc<dyn DeliveryRepository> =
        Arc::new(DieselDeliveryRepository::new(participant.pool.clone()));
    let (handle, registrations) = SchedulerHandle::channel();
    let service = Arc::new(DeliveryService::new(repo, handle));

    // Reloads unfinished deliveries before taking new registrations.
    tokio::spawn(ProgressScheduler::new(service.clone(), registrations).run());
    participant.spawn_relay();
    participant.spawn_consumer(service.clone())?;

    let (host, port) = (participant.config.host.clone(), participant.config.port);
    info!("Starting delivery service at http://{host}:{port}");
    build_delivery_server(web::Data::from(service), participant.deadline(), &host, port)?.await
}
