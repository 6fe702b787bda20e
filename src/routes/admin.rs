use axum::{
    Json, Router,
    extract::{Path, State},
    routing::patch,
};

use crate::{
    dto::orders::UpdateOrderStatusRequest,
    error::AppResult,
    middleware::auth::AuthUser,
    models::Order,
    response::ApiResponse,
    services::admin_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/orders/{order_number}/status", patch(update_order_status))
}

#[utoipa::path(
    patch,
    path = "/api/admin/orders/{order_number}/status",
    params(
        ("order_number" = String, Path, description = "Order number")
    ),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status moved along the fulfilment path", body = ApiResponse<Order>),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Transition not allowed from the current status"),
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_number): Path<String>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> AppResult<Json<ApiResponse<Order>>> {
    Ok(Json(
        admin_service::update_order_status(&state, &user, &order_number, payload).await?,
    ))
}
