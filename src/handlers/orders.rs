use std::str::FromStr;
use std::sync::Arc;

use actix_web::{web, HttpResponse};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{within_deadline, RequestDeadline};
use crate::application::order_service::OrderService;
use crate::domain::order::{DeliveryTracking, OrderItemInput, OrderView};
use crate::domain::ports::OrderRepository;
use crate::errors::AppError;

pub type SharedOrderService = OrderService<Arc<dyn OrderRepository>>;

// ── Request / response DTOs ──────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub quantity: i32,
    /// Decimal price as a string to avoid floating-point issues, e.g. "9.99"
    pub price: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub items: Vec<OrderItemRequest>,
    #[serde(default)]
    pub delivery_address: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: String,
    pub status: String,
    pub total_amount: String,
    pub delivery_address: String,
    pub created_at: String,
}

impl From<OrderView> for OrderResponse {
    fn from(order: OrderView) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            status: order.status.to_string(),
            total_amount: order.total_amount.to_string(),
            delivery_address: order.delivery_address,
            created_at: order.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderDeliveryResponse {
    pub order_id: Uuid,
    pub order_status: String,
    /// `NOT_DISPATCHED` until the first delivery event arrives.
    pub delivery_status: String,
    pub tracking_number: Option<String>,
    pub estimated_delivery: Option<String>,
    pub current_location: Option<String>,
}

impl From<DeliveryTracking> for OrderDeliveryResponse {
    fn from(tracking: DeliveryTracking) -> Self {
        let delivery_status = tracking.status_label().to_string();
        let delivery = tracking.delivery;
        Self {
            order_id: tracking.order_id,
            order_status: tracking.order_status.to_string(),
            delivery_status,
            tracking_number: delivery.as_ref().map(|d| d.tracking_number.clone()),
            estimated_delivery: delivery.as_ref().map(|d| d.estimated_delivery.clone()),
            current_location: delivery.and_then(|d| d.current_location),
        }
    }
}

fn parse_items(items: Vec<OrderItemRequest>) -> Result<Vec<OrderItemInput>, AppError> {
    items
        .into_iter()
        .map(|i| {
            let price = BigDecimal::from_str(i.price.trim()).map_err(|_| {
                AppError::BadRequest(format!("invalid price '{}' for '{}'", i.price, i.product_id))
            })?;
            Ok(OrderItemInput {
                product_id: i.product_id,
                quantity: i.quantity,
                price,
            })
        })
        .collect()
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /orders
///
/// Validates the order, computes its total and stores it as PENDING together
/// with its `order.created` event. Payment happens asynchronously.
#[utoipa::path(
    post,
    path = "/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = CreateOrderResponse),
        (status = 400, description = "Invalid order"),
        (status = 500, description = "Internal server error"),
        (status = 504, description = "Storage did not answer in time"),
    ),
    tag = "orders"
)]
pub async fn create_order(
    service: web::Data<SharedOrderService>,
    deadline: web::Data<RequestDeadline>,
    body: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let items = parse_items(body.items)?;
    let service = service.into_inner();

    let created = within_deadline(**deadline, move |until| {
        service.create_order(&body.user_id, items, &body.delivery_address, until)
    })
    .await?;

    Ok(HttpResponse::Created().json(CreateOrderResponse {
        order_id: created.order.id,
        status: created.order.status.to_string(),
        message: created.message,
    }))
}

/// GET /orders/{id}
#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(
        ("id" = Uuid, Path, description = "Order UUID"),
    ),
    responses(
        (status = 200, description = "Order found", body = OrderResponse),
        (status = 404, description = "Order not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "orders"
)]
pub async fn get_order(
    service: web::Data<SharedOrderService>,
    deadline: web::Data<RequestDeadline>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let service = service.into_inner();

    let order = within_deadline(**deadline, move |_| service.get_order(order_id)).await?;
    Ok(HttpResponse::Ok().json(OrderResponse::from(order)))
}

/// GET /orders/{id}/delivery
///
/// Shipping as last reported to the order service. Answers from the local
/// read model only.
#[utoipa::path(
    get,
    path = "/orders/{id}/delivery",
    params(
        ("id" = Uuid, Path, description = "Order UUID"),
    ),
    responses(
        (status = 200, description = "Delivery tracking", body = OrderDeliveryResponse),
        (status = 404, description = "Order not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "orders"
)]
pub async fn get_delivery_status(
    service: web::Data<SharedOrderService>,
    deadline: web::Data<RequestDeadline>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let service = service.into_inner();

    let tracking =
        within_deadline(**deadline, move |_| service.get_delivery_status(order_id)).await?;
    Ok(HttpResponse::Ok().json(OrderDeliveryResponse::from(tracking)))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/orders")
            .route("", web::post().to(create_order))
            .route("/{id}", web::get().to(get_order))
            .route("/{id}/delivery", web::get().to(get_delivery_status)),
    );
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::{json, Value};

    use std::time::Duration;

    use super::*;
    use crate::domain::deadline::Deadline;
    use crate::domain::errors::DomainError;
    use crate::domain::events::OutboxMessage;
    use crate::domain::order::{DeliveryStatusView, NewOrder, OrderStatus, StatusChange};
    use crate::domain::ports::OutboxStore;
    use crate::infrastructure::memory::InMemoryOrderRepository;

    /// Stalls every insert, like a database under lock contention.
    struct SlowOrderRepository {
        inner: InMemoryOrderRepository,
        delay: Duration,
    }

    impl OrderRepository for SlowOrderRepository {
        fn create(
            &self,
            order: &NewOrder,
            event: &OutboxMessage,
            deadline: Deadline,
        ) -> Result<(), DomainError> {
            std::thread::sleep(self.delay);
            self.inner.create(order, event, deadline)
        }
        fn find_by_id(&self, id: Uuid) -> Result<Option<OrderView>, DomainError> {
            self.inner.find_by_id(id)
        }
        fn apply_payment_outcome(
            &self,
            id: Uuid,
            status: OrderStatus,
        ) -> Result<Option<StatusChange>, DomainError> {
            self.inner.apply_payment_outcome(id, status)
        }
        fn upsert_delivery_status(
            &self,
            status: &DeliveryStatusView,
        ) -> Result<bool, DomainError> {
            self.inner.upsert_delivery_status(status)
        }
        fn find_delivery_status(
            &self,
            order_id: Uuid,
        ) -> Result<Option<DeliveryStatusView>, DomainError> {
            self.inner.find_delivery_status(order_id)
        }
    }

    fn app_data(
        repo: &InMemoryOrderRepository,
    ) -> (web::Data<SharedOrderService>, web::Data<RequestDeadline>) {
        let shared: Arc<dyn OrderRepository> = Arc::new(repo.clone());
        (
            web::Data::new(OrderService::new(shared)),
            web::Data::new(RequestDeadline::default()),
        )
    }

    #[actix_web::test]
    async fn create_order_returns_201_and_queues_the_event() {
        let repo = InMemoryOrderRepository::default();
        let (service, deadline) = app_data(&repo);
        let app = test::init_service(
            App::new()
                .app_data(service)
                .app_data(deadline)
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/orders")
            .set_json(json!({
                "user_id": "user-1",
                "items": [{ "product_id": "sku-1", "quantity": 2, "price": "10.00" }],
                "delivery_address": "1 Main St"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "PENDING");
        assert_eq!(body["message"], "Order created successfully, processing payment");
        assert_eq!(repo.outbox().pending(10).unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn invalid_orders_are_rejected_with_400() {
        let repo = InMemoryOrderRepository::default();
        let (service, deadline) = app_data(&repo);
        let app = test::init_service(
            App::new()
                .app_data(service)
                .app_data(deadline)
                .configure(configure),
        )
        .await;

        for body in [
            json!({ "user_id": "u1", "items": [] }),
            json!({ "user_id": "u1", "items": [{ "product_id": "p", "quantity": 0, "price": "1.00" }] }),
            json!({ "user_id": "u1", "items": [{ "product_id": "p", "quantity": 1, "price": "abc" }] }),
            json!({ "user_id": "u1", "items": [{ "product_id": "p", "quantity": 1, "price": "1e10000000" }] }),
            json!({ "user_id": "u1", "items": [{ "product_id": "p", "quantity": 10000, "price": "9999999.99" }] }),
        ] {
            let req = test::TestRequest::post().uri("/orders").set_json(body).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
        assert_eq!(repo.order_count(), 0);
    }

    #[actix_web::test]
    async fn get_order_and_tracking_before_dispatch() {
        let repo = InMemoryOrderRepository::default();
        let (service, deadline) = app_data(&repo);
        let id = service
            .create_order(
                "user-1",
                vec![OrderItemInput {
                    product_id: "sku-1".to_string(),
                    quantity: 1,
                    price: BigDecimal::from_str("5.50").unwrap(),
                }],
                "1 Main St",
                Deadline::NONE,
            )
            .unwrap()
            .order
            .id;
        let app = test::init_service(
            App::new()
                .app_data(service)
                .app_data(deadline)
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri(&format!("/orders/{id}")).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total_amount"], "5.50");
        assert_eq!(body["status"], "PENDING");

        let req = test::TestRequest::get()
            .uri(&format!("/orders/{id}/delivery"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["delivery_status"], "NOT_DISPATCHED");
        assert!(body["tracking_number"].is_null());
    }

    #[actix_web::test]
    async fn unknown_order_is_404() {
        let repo = InMemoryOrderRepository::default();
        let (service, deadline) = app_data(&repo);
        let app = test::init_service(
            App::new()
                .app_data(service)
                .app_data(deadline)
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri(&format!("/orders/{}", Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn timed_out_create_commits_nothing() {
        let repo = InMemoryOrderRepository::default();
        let slow: Arc<dyn OrderRepository> = Arc::new(SlowOrderRepository {
            inner: repo.clone(),
            delay: Duration::from_millis(200),
        });
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(OrderService::new(slow)))
                .app_data(web::Data::new(RequestDeadline(Duration::from_millis(20))))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/orders")
            .set_json(json!({
                "user_id": "user-1",
                "items": [{ "product_id": "sku-1", "quantity": 1, "price": "10.00" }],
                "delivery_address": "1 Main St"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);

        // Let the abandoned blocking call run to completion.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(repo.order_count(), 0);
        assert!(repo.outbox().pending(10).unwrap().is_empty());
    }
}
