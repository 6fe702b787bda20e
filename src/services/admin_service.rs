use serde_json::json;

use crate::{
    audit::log_audit,
    dto::orders::UpdateOrderStatusRequest,
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, Shopper},
    response::ApiResponse,
    state::AppState,
};

pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    order_number: &str,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;

    let order = state
        .orders
        .find_by_number(order_number)
        .await?
        .ok_or(AppError::NotFound)?;
    let (from, to) = (order.status, payload.status);
    if !from.can_transition_to(to) {
        return Err(AppError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    if !state.orders.transition(order_number, from, to).await? {
        // Someone else moved it first; report against what is stored now.
        let current = state
            .orders
            .find_by_number(order_number)
            .await?
            .map(|o| o.status)
            .unwrap_or(from);
        return Err(AppError::InvalidTransition {
            from: current.to_string(),
            to: to.to_string(),
        });
    }

    tracing::info!(order_number, from = %from, to = %to, "order status updated");
    log_audit(
        state,
        &Shopper::User(user.user_id),
        "order_status_update",
        Some("orders"),
        Some(json!({ "order_number": order_number, "from": from, "to": to })),
    )
    .await;

    let updated = state
        .orders
        .find_by_number(order_number)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success("Order status updated", updated, None))
}
