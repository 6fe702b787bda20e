use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::LineAttributes;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Options such as size or colour; merged into an existing line.
    #[serde(default)]
    pub attributes: Option<LineAttributes>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCartItemRequest {
    /// Below 1 removes the line.
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ApplyCouponRequest {
    pub code: String,
}
