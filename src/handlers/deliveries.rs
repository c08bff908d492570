use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{within_deadline, RequestDeadline};
use crate::application::delivery_service::DeliveryService;
use crate::domain::delivery::{DeliveryCreation, DeliveryView};
use crate::domain::ports::DeliveryRepository;
use crate::errors::AppError;

pub type SharedDeliveryService = DeliveryService<Arc<dyn DeliveryRepository>>;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDeliveryRequest {
    pub order_id: Uuid,
    pub user_id: String,
    /// Falls back to "Default Address" when absent or blank.
    pub address: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateDeliveryResponse {
    pub delivery_id: Uuid,
    pub tracking_number: String,
    pub status: String,
    pub estimated_delivery: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeliveryResponse {
    pub delivery_id: Uuid,
    pub order_id: Uuid,
    pub status: String,
    pub tracking_number: String,
    pub current_location: String,
    pub estimated_delivery: String,
    pub address: String,
    pub updated_at: String,
}

impl From<DeliveryView> for DeliveryResponse {
    fn from(d: DeliveryView) -> Self {
        Self {
            delivery_id: d.id,
            order_id: d.order_id,
            status: d.status.to_string(),
            tracking_number: d.tracking_number,
            current_location: d.current_location,
            estimated_delivery: d.estimated_delivery,
            address: d.address,
            updated_at: d.updated_at.to_rfc3339(),
        }
    }
}

/// POST /deliveries
///
/// Creates the delivery for an order and schedules its progression. A second
/// call for the same order returns the existing delivery with 200.
#[utoipa::path(
    post,
    path = "/deliveries",
    request_body = CreateDeliveryRequest,
    responses(
        (status = 201, description = "Delivery created", body = CreateDeliveryResponse),
        (status = 200, description = "Delivery already existed", body = CreateDeliveryResponse),
        (status = 400, description = "Invalid request"),
    ),
    tag = "deliveries"
)]
pub async fn create_delivery(
    service: web::Data<SharedDeliveryService>,
    deadline: web::Data<RequestDeadline>,
    body: web::Json<CreateDeliveryRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let service = service.into_inner();

    let creation = within_deadline(**deadline, move |until| {
        service.create_delivery(body.order_id, &body.user_id, body.address.as_deref(), until)
    })
    .await?;

    let mut response = match creation {
        DeliveryCreation::Created(_) => HttpResponse::Created(),
        DeliveryCreation::Existing(_) => HttpResponse::Ok(),
    };
    let view = creation.view();
    Ok(response.json(CreateDeliveryResponse {
        delivery_id: view.id,
        tracking_number: view.tracking_number.clone(),
        status: view.status.to_string(),
        estimated_delivery: view.estimated_delivery.clone(),
    }))
}

/// GET /deliveries/{order_id}
#[utoipa::path(
    get,
    path = "/deliveries/{order_id}",
    params(
        ("order_id" = Uuid, Path, description = "Order UUID"),
    ),
    responses(
        (status = 200, description = "Delivery found", body = DeliveryResponse),
        (status = 404, description = "No delivery for this order"),
    ),
    tag = "deliveries"
)]
pub async fn get_delivery_status(
    service: web::Data<SharedDeliveryService>,
    deadline: web::Data<RequestDeadline>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();
    let service = service.into_inner();

    let delivery =
        within_deadline(**deadline, move |_| service.get_delivery_status(order_id)).await?;
    Ok(HttpResponse::Ok().json(DeliveryResponse::from(delivery)))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/deliveries", web::post().to(create_delivery))
        .route("/deliveries/{order_id}", web::get().to(get_delivery_status));
}
