pub mod application;
pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod handlers;
pub mod infrastructure;
pub mod openapi;
pub mod runtime;
pub mod schema;

use actix_web::{error, middleware::Logger, web, App, HttpResponse, HttpServer};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::domain::errors::DomainError;
use crate::handlers::deliveries::SharedDeliveryService;
use crate::handlers::health::ServiceName;
use crate::handlers::orders::SharedOrderService;
use crate::handlers::payments::SharedPaymentService;
use crate::handlers::RequestDeadline;
use crate::openapi::{DeliveryApi, OrderApi, PaymentApi};

pub use db::{create_pool, DbPool};

pub const ORDER_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/order");
pub const PAYMENT_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/payment");
pub const DELIVERY_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/delivery");

/// Run any pending Diesel migrations against the pool's database.
pub fn run_migrations(pool: &DbPool, migrations: EmbeddedMigrations) -> Result<(), DomainError> {
    let mut conn = pool.get()?;
    conn.run_pending_migrations(migrations)
        .map_err(|e| DomainError::Storage(format!("migrations failed: {e}")))?;
    Ok(())
}

/// Malformed JSON bodies answer 400 in the same `{"error": ...}` shape as
/// every other failure.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let body = serde_json::json!({ "error": err.to_string() });
        error::InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
    })
}

fn serve<F>(
    name: &'static str,
    api: utoipa::openapi::OpenApi,
    deadline: RequestDeadline,
    host: &str,
    port: u16,
    routes: F,
) -> std::io::Result<actix_web::dev::Server>
where
    F: Fn(&mut web::ServiceConfig) + Send + Clone + 'static,
{
    Ok(HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(deadline))
            .app_data(web::Data::new(ServiceName(name)))
            .app_data(json_config())
            .wrap(Logger::default())
            .configure(routes.clone())
            .configure(handlers::health::configure)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", api.clone()),
            )
    })
    .bind((host.to_string(), port))?
    .run())
}

/// Build and return the order service's HTTP server bound to `host:port`.
///
/// The caller is responsible for `.await`-ing (or `tokio::spawn`-ing) the
/// returned server.
pub fn build_order_server(
    service: web::Data<SharedOrderService>,
    deadline: RequestDeadline,
    host: &str,
    port: u16,
) -> std::io::Result<actix_web::dev::Server> {
    serve("order-service", OrderApi::openapi(), deadline, host, port, move |cfg| {
        cfg.app_data(service.clone());
        handlers::orders::configure(cfg);
    })
}

pub fn build_payment_server(
    service: web::Data<SharedPaymentService>,
    deadline: RequestDeadline,
    host: &str,
    port: u16,
) -> std::io::Result<actix_web::dev::Server> {
    serve("payment-service", PaymentApi::openapi(), deadline, host, port, move |cfg| {
        cfg.app_data(service.clone());
        handlers::payments::configure(cfg);
    })
}

pub fn build_delivery_server(
    service: web::Data<SharedDeliveryService>,
    deadline: RequestDeadline,
    host: &str,
    port: u16,
) -> std::io::Result<actix_web::dev::Server> {
    serve("delivery-service", DeliveryApi::openapi(), deadline, host, port, move |cfg| {
        cfg.app_data(service.clone());
        handlers::deliveries::configure(cfg);
    })
}
