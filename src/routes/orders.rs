use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};

use crate::{
    dto::orders::{CheckoutRequest, OrderList},
    error::AppResult,
    models::{Order, Shopper},
    response::ApiResponse,
    routes::params::Pagination,
    services::order_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/checkout", post(checkout))
        .route("/{order_number}", get(get_order))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    params(Pagination),
    responses(
        (status = 200, description = "Orders placed by the shopper, newest first", body = ApiResponse<OrderList>)
    ),
    security(("bearer_auth" = []), ("session_token" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    shopper: Shopper,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<ApiResponse<OrderList>>> {
    Ok(Json(
        order_service::list_orders(&state, &shopper, pagination).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/api/orders/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created from the cart", body = ApiResponse<Order>),
        (status = 400, description = "Empty cart or invalid checkout details"),
        (status = 409, description = "Insufficient stock"),
        (status = 422, description = "Attached coupon no longer applies"),
    ),
    security(("bearer_auth" = []), ("session_token" = [])),
    tag = "Orders"
)]
pub async fn checkout(
    State(state): State<AppState>,
    shopper: Shopper,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Order>>)> {
    let order = order_service::checkout(&state, &shopper, payload).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

#[utoipa::path(
    get,
    path = "/api/orders/{order_number}",
    params(
        ("order_number" = String, Path, description = "Order number, e.g. ORD-20260101-0A1B2C3D4E5F")
    ),
    responses(
        (status = 200, description = "Order with its items", body = ApiResponse<Order>),
        (status = 404, description = "Order not found"),
    ),
    security(("bearer_auth" = []), ("session_token" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    shopper: Shopper,
    Path(order_number): Path<String>,
) -> AppResult<Json<ApiResponse<Order>>> {
    Ok(Json(
        order_service::get_order(&state, &shopper, &order_number).await?,
    ))
}
