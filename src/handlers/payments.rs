use std::str::FromStr;
use std::sync::Arc;

use actix_web::{web, HttpResponse};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{within_deadline, RequestDeadline};
use crate::application::payment_service::PaymentService;
use crate::domain::payment::{PaymentRequest, PaymentView};
use crate::domain::ports::PaymentRepository;
use crate::errors::AppError;

pub type SharedPaymentService = PaymentService<Arc<dyn PaymentRepository>>;

fn parse_amount(field: &str, raw: &str) -> Result<BigDecimal, AppError> {
    BigDecimal::from_str(raw.trim())
        .map_err(|_| AppError::BadRequest(format!("invalid {field} '{raw}'")))
}

// ── Request / response DTOs ──────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProcessPaymentRequest {
    pub order_id: Uuid,
    pub user_id: String,
    /// Decimal amount as a string, e.g. "20.00"
    pub amount: String,
    pub delivery_address: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProcessPaymentResponse {
    pub payment_id: Uuid,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentResponse {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub user_id: String,
    pub amount: String,
    pub status: String,
    pub created_at: String,
}

impl From<PaymentView> for PaymentResponse {
    fn from(p: PaymentView) -> Self {
        Self {
            payment_id: p.id,
            order_id: p.order_id,
            user_id: p.user_id,
            amount: p.amount.to_string(),
            status: p.status.to_string(),
            created_at: p.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetBalanceRequest {
    pub balance: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceResponse {
    pub user_id: String,
    pub balance: String,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /payments
///
/// Settles the payment for an order. Repeating the call for the same order
/// returns the original outcome without charging again.
#[utoipa::path(
    post,
    path = "/payments",
    request_body = ProcessPaymentRequest,
    responses(
        (status = 200, description = "Payment settled (successfully or not)", body = ProcessPaymentResponse),
        (status = 400, description = "Invalid request"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "payments"
)]
pub async fn process_payment(
    service: web::Data<SharedPaymentService>,
    deadline: web::Data<RequestDeadline>,
    body: web::Json<ProcessPaymentRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let request = PaymentRequest {
        order_id: body.order_id,
        user_id: body.user_id,
        amount: parse_amount("amount", &body.amount)?,
        delivery_address: body.delivery_address,
    };
    let service = service.into_inner();

    let settlement =
        within_deadline(**deadline, move |until| service.process_payment(request, until)).await?;
    Ok(HttpResponse::Ok().json(ProcessPaymentResponse {
        payment_id: settlement.payment.id,
        status: settlement.payment.status.to_string(),
        message: settlement.message(),
    }))
}

/// GET /payments/{order_id}
#[utoipa::path(
    get,
    path = "/payments/{order_id}",
    params(
        ("order_id" = Uuid, Path, description = "Order UUID"),
    ),
    responses(
        (status = 200, description = "Payment found", body = PaymentResponse),
        (status = 404, description = "No payment for this order"),
    ),
    tag = "payments"
)]
pub async fn get_payment_status(
    service: web::Data<SharedPaymentService>,
    deadline: web::Data<RequestDeadline>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let service = service.into_inner();

    let payment = within_deadline(**deadline, move |_| service.get_payment_status(order_id)).await?;
    Ok(HttpResponse::Ok().json(PaymentResponse::from(payment)))
}

/// GET /balances/{user_id}
#[utoipa::path(
    get,
    path = "/balances/{user_id}",
    params(
        ("user_id" = String, Path, description = "User id"),
    ),
    responses(
        (status = 200, description = "Current balance", body = BalanceResponse),
    ),
    tag = "payments"
)]
pub async fn get_balance(
    service: web::Data<SharedPaymentService>,
    deadline: web::Data<RequestDeadline>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let service = service.into_inner();

    let lookup = user_id.clone();
    let balance = within_deadline(**deadline, move |_| service.get_balance(&lookup)).await?;
    Ok(HttpResponse::Ok().json(BalanceResponse {
        user_id,
        balance: balance.to_string(),
    }))
}

/// PUT /balances/{user_id}
///
/// Seeds a simulated balance, e.g. to stage an insufficient-funds order.
#[utoipa::path(
    put,
    path = "/balances/{user_id}",
    params(
        ("user_id" = String, Path, description = "User id"),
    ),
    request_body = SetBalanceRequest,
    responses(
        (status = 200, description = "Balance stored", body = BalanceResponse),
        (status = 400, description = "Negative, oversized or malformed balance"),
    ),
    tag = "payments"
)]
pub async fn set_balance(
    service: web::Data<SharedPaymentService>,
    deadline: web::Data<RequestDeadline>,
    path: web::Path<String>,
    body: web::Json<SetBalanceRequest>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let balance = parse_amount("balance", &body.balance)?;
    let service = service.into_inner();

    let (target, amount) = (user_id.clone(), balance.clone());
    within_deadline(**deadline, move |until| service.set_balance(&target, amount, until)).await?;
    Ok(HttpResponse::Ok().json(BalanceResponse {
        user_id,
        balance: balance.to_string(),
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/payments", web::post().to(process_payment))
        .route("/payments/{order_id}", web::get().to(get_payment_status))
        .route("/balances/{user_id}", web::get().to(get_balance))
        .route("/balances/{user_id}", web::put().to(set_balance));
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::{json, Value};

    use super::*;
    use crate::infrastructure::memory::InMemoryPaymentRepository;

    fn service(repo: &InMemoryPaymentRepository) -> web::Data<SharedPaymentService> {
        let shared: Arc<dyn PaymentRepository> = Arc::new(repo.clone());
        web::Data::new(PaymentService::new(shared, BigDecimal::from(1000)))
    }

    #[actix_web::test]
    async fn repeated_payment_returns_the_first_outcome() {
        let repo = InMemoryPaymentRepository::default();
        let app = test::init_service(
            App::new()
                .app_data(service(&repo))
                .app_data(web::Data::new(RequestDeadline::default()))
                .configure(configure),
        )
        .await;
        let body = json!({
            "order_id": Uuid::new_v4(),
            "user_id": "user-1",
            "amount": "20.00"
        });

        let req = test::TestRequest::post().uri("/payments").set_json(&body).to_request();
        let first: Value = test::call_and_read_body_json(&app, req).await;
        let req = test::TestRequest::post().uri("/payments").set_json(&body).to_request();
        let second: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(first["status"], "SUCCESS");
        assert_eq!(first["message"], "Payment of 20.00 processed successfully");
        assert_eq!(first["payment_id"], second["payment_id"]);

        let req = test::TestRequest::get().uri("/balances/user-1").to_request();
        let balance: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(balance["balance"], "980.00");
        assert_eq!(repo.payment_count(), 1);
    }

    #[actix_web::test]
    async fn seeded_balance_drives_insufficient_funds() {
        let repo = InMemoryPaymentRepository::default();
        let app = test::init_service(
            App::new()
                .app_data(service(&repo))
                .app_data(web::Data::new(RequestDeadline::default()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/balances/user-2")
            .set_json(json!({ "balance": "5.00" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let order_id = Uuid::new_v4();
        let req = test::TestRequest::post()
            .uri("/payments")
            .set_json(json!({ "order_id": order_id, "user_id": "user-2", "amount": "20.00" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "INSUFFICIENT_FUNDS");
        assert_eq!(body["message"], "Insufficient funds. Balance: 5.00, Required: 20.00");

        let req = test::TestRequest::get()
            .uri(&format!("/payments/{order_id}"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "INSUFFICIENT_FUNDS");
    }

    #[actix_web::test]
    async fn negative_balance_and_unknown_payment_are_rejected() {
        let repo = InMemoryPaymentRepository::default();
        let app = test::init_service(
            App::new()
                .app_data(service(&repo))
                .app_data(web::Data::new(RequestDeadline::default()))
                .configure(configure),
        )
        .await;

        for balance in ["-1.00", "10000000000.00", "1e10000000"] {
            let req = test::TestRequest::put()
                .uri("/balances/user-3")
                .set_json(json!({ "balance": balance }))
                .to_request();
            assert_eq!(
                test::call_service(&app, req).await.status(),
                StatusCode::BAD_REQUEST,
                "balance {balance}"
            );
        }

        let req = test::TestRequest::post()
            .uri("/payments")
            .set_json(json!({
                "order_id": Uuid::new_v4(),
                "user_id": "user-3",
                "amount": "10000000000.00"
            }))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(repo.payment_count(), 0);

        let req = test::TestRequest::get()
            .uri(&format!("/payments/{}", Uuid::new_v4()))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::NOT_FOUND
        );
    }
}
