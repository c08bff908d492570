use utoipa::OpenApi;

use crate::handlers::{deliveries, health, orders, payments};

#[derive(OpenApi)]
#[openapi(
    info(title = "Order service", description = "Accepts orders and tracks their saga"),
    paths(
        orders::create_order,
        orders::get_order,
        orders::get_delivery_status,
        health::health,
    ),
    tags((name = "orders", description = "Order lifecycle"))
)]
pub struct OrderApi;

#[derive(OpenApi)]
#[openapi(
    info(title = "Payment service", description = "Settles order payments against user balances"),
    paths(
        payments::process_payment,
        payments::get_payment_status,
        payments::get_balance,
        payments::set_balance,
        health::health,
    ),
    tags((name = "payments", description = "Payments and simulated balances"))
)]
pub struct PaymentApi;

#[derive(OpenApi)]
#[openapi(
    info(title = "Delivery service", description = "Creates deliveries and advances them through their stages"),
    paths(
        deliveries::create_delivery,
        deliveries::get_delivery_status,
        health::health,
    ),
    tags((name = "deliveries", description = "Delivery tracking"))
)]
pub struct DeliveryApi;
