use std::sync::Arc;

use actix_web::web;
use dotenvy::dotenv;
use log::info;
use order_saga::application::order_service::OrderService;
use order_saga::config::ServiceDefaults;
use order_saga::domain::ports::OrderRepository;
use order_saga::infrastructure::order_repo::DieselOrderRepository;
use order_saga::runtime::Participant;
use order_saga::{build_order_server, ORDER_MIGRATIONS};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let defaults = ServiceDefaults {
        name: "order",
        port: 8080,
    };
    let participant = Participant::start(defaults, ORDER_MIGRATIONS)?;

    let repo: Arc<dyn OrderRepository> =
        Arc::new(DieselOrderRepository::new(participant.pool.clone()));
    let service = Arc::new(OrderService::new(repo));

    participant.spawn_relay();
    participant.spawn_consumer(service.clone())?;

    let (host, port) = (participant.config.host.clone(), participant.config.port);
    info!("Starting order service at http://{host}:{port}");
    build_order_server(web::Data::from(service), participant.deadline(), &host, port)?.await
}
