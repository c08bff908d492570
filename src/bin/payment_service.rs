use std::sync::Arc;

use actix_web::web;
use dotenvy::dotenv;
use log::info;
use order_saga::application::payment_service::PaymentService;
use order_saga::config::ServiceDefaults;
use order_saga::domain::ports::PaymentRepository;
use order_saga::infrastructure::payment_repo::DieselPaymentRepository;
use order_saga::runtime::Participant;
use order_saga::{build_payment_server, PAYMENT_MIGRATIONS};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let defaults = ServiceDefaults {
        name: "payment",
        port: 8081,
    };
    let participant = Participant::start(defaults, PAYMENT_MIGRATIONS)?;

    let repo: Arc<dyn PaymentRepository> =
        Arc::new(DieselPaymentRepository::new(participant.pool.clone()));
    let service = Arc::new(PaymentService::new(
        repo,
        participant.config.opening_balance.clone(),
    ));

    participant.spawn_relay();
    participant.spawn_consumer(service.clone())?;

    let (host, port) = (participant.config.host.clone(), participant.config.port);
    info!("Starting payment service at http://{host}:{port}");
    build_payment_server(web::Data::from(service), participant.deadline(), &host, port)?.await
}
