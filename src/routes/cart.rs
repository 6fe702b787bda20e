use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, patch, post},
};
use uuid::Uuid;

use crate::{
    dto::cart::{AddToCartRequest, ApplyCouponRequest, UpdateCartItemRequest},
    error::AppResult,
    models::Shopper,
    response::ApiResponse,
    services::{cart_service, pricing::PricedCart},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_to_cart))
        .route(
            "/items/{product_id}",
            patch(update_cart_item).delete(remove_from_cart),
        )
        .route("/coupon", post(apply_coupon).delete(remove_coupon))
}

#[utoipa::path(
    get,
    path = "/api/cart",
    responses(
        (status = 200, description = "Priced cart with stock flags", body = ApiResponse<PricedCart>),
        (status = 400, description = "No shopper identity"),
    ),
    security(("bearer_auth" = []), ("session_token" = [])),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    shopper: Shopper,
) -> AppResult<Json<ApiResponse<PricedCart>>> {
    Ok(Json(cart_service::get_cart(&state, &shopper).await?))
}

#[utoipa::path(
    post,
    path = "/api/cart/items",
    request_body = AddToCartRequest,
    responses(
        (status = 200, description = "Line added or incremented", body = ApiResponse<PricedCart>),
        (status = 400, description = "Invalid quantity or attributes"),
        (status = 404, description = "Product not found"),
        (status = 409, description = "Product out of stock"),
    ),
    security(("bearer_auth" = []), ("session_token" = [])),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    shopper: Shopper,
    Json(payload): Json<AddToCartRequest>,
) -> AppResult<Json<ApiResponse<PricedCart>>> {
    Ok(Json(
        cart_service::add_to_cart(&state, &shopper, payload).await?,
    ))
}

#[utoipa::path(
    patch,
    path = "/api/cart/items/{product_id}",
    params(
        ("product_id" = Uuid, Path, description = "Product ID")
    ),
    request_body = UpdateCartItemRequest,
    responses(
        (status = 200, description = "Line quantity set", body = ApiResponse<PricedCart>),
        (status = 404, description = "Product is not in the cart"),
    ),
    security(("bearer_auth" = []), ("session_token" = [])),
    tag = "Cart"
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    shopper: Shopper,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<UpdateCartItemRequest>,
) -> AppResult<Json<ApiResponse<PricedCart>>> {
    Ok(Json(
        cart_service::update_cart_item(&state, &shopper, product_id, payload).await?,
    ))
}

#[utoipa::path(
    delete,
    path = "/api/cart/items/{product_id}",
    params(
        ("product_id" = Uuid, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "Line removed (idempotent)", body = ApiResponse<PricedCart>),
    ),
    security(("bearer_auth" = []), ("session_token" = [])),
    tag = "Cart"
)]
pub async fn remove_from_cart(
    State(state): State<AppState>,
    shopper: Shopper,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<PricedCart>>> {
    Ok(Json(
        cart_service::remove_from_cart(&state, &shopper, product_id).await?,
    ))
}

#[utoipa::path(
    delete,
    path = "/api/cart",
    responses(
        (status = 200, description = "Cart emptied", body = ApiResponse<PricedCart>),
    ),
    security(("bearer_auth" = []), ("session_token" = [])),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    shopper: Shopper,
) -> AppResult<Json<ApiResponse<PricedCart>>> {
    Ok(Json(cart_service::clear_cart(&state, &shopper).await?))
}

#[utoipa::path(
    post,
    path = "/api/cart/coupon",
    request_body = ApplyCouponRequest,
    responses(
        (status = 200, description = "Coupon attached", body = ApiResponse<PricedCart>),
        (status = 400, description = "Malformed code"),
        (status = 404, description = "Unknown coupon"),
        (status = 422, description = "Coupon expired, used up or minimum not met"),
    ),
    security(("bearer_auth" = []), ("session_token" = [])),
    tag = "Cart"
)]
pub async fn apply_coupon(
    State(state): State<AppState>,
    shopper: Shopper,
    Json(payload): Json<ApplyCouponRequest>,
) -> AppResult<Json<ApiResponse<PricedCart>>> {
    Ok(Json(
        cart_service::apply_coupon(&state, &shopper, payload).await?,
    ))
}

#[utoipa::path(
    delete,
    path = "/api/cart/coupon",
    responses(
        (status = 200, description = "Coupon detached", body = ApiResponse<PricedCart>),
    ),
    security(("bearer_auth" = []), ("session_token" = [])),
    tag = "Cart"
)]
pub async fn remove_coupon(
    State(state): State<AppState>,
    shopper: Shopper,
) -> AppResult<Json<ApiResponse<PricedCart>>> {
    Ok(Json(cart_service::remove_coupon(&state, &shopper).await?))
}
