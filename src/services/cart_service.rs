use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    catalog::CatalogProduct,
    dto::cart::{AddToCartRequest, ApplyCouponRequest, UpdateCartItemRequest},
    error::{AppError, AppResult},
    models::{Campaign, CartLine, Coupon, LineAttributes, Shopper},
    money,
    response::ApiResponse,
    services::{
        discount::{check_coupon, normalize_coupon_code},
        pricing::{PricedCart, PricingInput, PricingPolicy, price_cart},
    },
    state::AppState,
    store::{NewCartLine, too_many_attributes},
};

const MAX_ATTRIBUTES: usize = 20;
const MAX_ATTRIBUTE_KEY_LEN: usize = 64;
const MAX_ATTRIBUTE_VALUE_LEN: usize = 256;

/// Everything pricing needs for one cart, read fresh from the stores.
pub(crate) struct CartSnapshot {
    pub lines: Vec<CartLine>,
    pub catalog: HashMap<Uuid, CatalogProduct>,
    pub campaigns: Vec<Campaign>,
    pub coupon: Option<Coupon>,
}

impl CartSnapshot {
    pub(crate) async fn load(
        state: &AppState,
        shopper: &Shopper,
        now: DateTime<Utc>,
    ) -> AppResult<Self> {
        let lines = state.carts.lines(shopper).await?;
        let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
        let catalog = state.catalog.lookup_many(&ids).await?;
        let campaigns = state.promotions.campaigns_for(&ids, now).await?;
        // A coupon deleted after it was attached counts as not attached.
        let coupon = match state.carts.coupon_code(shopper).await? {
            Some(code) => state.promotions.coupon(&code).await?,
            None => None,
        };

        Ok(Self {
            lines,
            catalog,
            campaigns,
            coupon,
        })
    }

    pub(crate) fn price(
        &self,
        policy: &PricingPolicy,
        tax: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> PricedCart {
        price_cart(PricingInput {
            lines: &self.lines,
            catalog: &self.catalog,
            campaigns: &self.campaigns,
            coupon: self.coupon.as_ref(),
            tax,
            policy,
            now,
        })
    }
}

async fn priced(state: &AppState, shopper: &Shopper) -> AppResult<PricedCart> {
    let now = Utc::now();
    Ok(CartSnapshot::load(state, shopper, now)
        .await?
        .price(&state.pricing, None, now))
}

fn validate_attributes(attributes: &LineAttributes) -> AppResult<()> {
    if attributes.len() > MAX_ATTRIBUTES {
        return Err(too_many_attributes(MAX_ATTRIBUTES));
    }
    for (key, value) in attributes {
        if key.trim().is_empty() || key.len() > MAX_ATTRIBUTE_KEY_LEN {
            return Err(AppError::ValidationFailed(format!(
                "attribute names must be 1 to {MAX_ATTRIBUTE_KEY_LEN} characters"
            )));
        }
        if value.len() > MAX_ATTRIBUTE_VALUE_LEN {
            return Err(AppError::ValidationFailed(format!(
                "attribute `{key}` is longer than {MAX_ATTRIBUTE_VALUE_LEN} characters"
            )));
        }
    }
    Ok(())
}

pub async fn get_cart(state: &AppState, shopper: &Shopper) -> AppResult<ApiResponse<PricedCart>> {
    Ok(ApiResponse::success("OK", priced(state, shopper).await?, None))
}

pub async fn add_to_cart(
    state: &AppState,
    shopper: &Shopper,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<PricedCart>> {
    if payload.quantity < 1 {
        return Err(AppError::InvalidQuantity);
    }
    let attributes = payload.attributes.unwrap_or_default();
    validate_attributes(&attributes)?;

    let product = state
        .catalog
        .lookup(payload.product_id)
        .await?
        .ok_or(AppError::ProductNotFound(payload.product_id))?;
    if product.stock <= 0 {
        return Err(AppError::OutOfStock(product.id));
    }

    state
        .carts
        .add_line(
            shopper,
            NewCartLine {
                product_id: product.id,
                vendor_id: product.vendor_id,
                quantity: payload.quantity,
                stock_cap: product.stock,
                unit_price_snapshot: money::cents(product.list_price()),
                attributes,
                max_attributes: MAX_ATTRIBUTES,
            },
        )
        .await?;

    tracing::debug!(
        shopper = %shopper,
        product_id = %product.id,
        quantity = payload.quantity,
        "cart line added"
    );
    log_audit(
        state,
        shopper,
        "cart_update",
        Some("cart_lines"),
        Some(json!({ "product_id": product.id, "quantity": payload.quantity })),
    )
    .await;

    Ok(ApiResponse::success(
        "Added to cart",
        priced(state, shopper).await?,
        None,
    ))
}

/// Set a line to `min(quantity, stock)`. Anything below 1 removes the line.
pub async fn update_cart_item(
    state: &AppState,
    shopper: &Shopper,
    product_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<PricedCart>> {
    if payload.quantity < 1 {
        return remove_from_cart(state, shopper, product_id).await;
    }

    let stock = state
        .catalog
        .lookup(product_id)
        .await?
        .map(|p| p.stock)
        .unwrap_or(0);
    let quantity = payload.quantity.min(stock);

    let found = if quantity < 1 {
        state.carts.remove_line(shopper, product_id).await?
    } else {
        state.carts.set_quantity(shopper, product_id, quantity).await?
    };
    if !found {
        return Err(AppError::LineNotFound(product_id));
    }

    tracing::debug!(shopper = %shopper, product_id = %product_id, quantity, "cart line updated");
    log_audit(
        state,
        shopper,
        "cart_update",
        Some("cart_lines"),
        Some(json!({ "product_id": product_id, "quantity": quantity })),
    )
    .await;

    Ok(ApiResponse::success(
        "Cart updated",
        priced(state, shopper).await?,
        None,
    ))
}

pub async fn remove_from_cart(
    state: &AppState,
    shopper: &Shopper,
    product_id: Uuid,
) -> AppResult<ApiResponse<PricedCart>> {
    if state.carts.remove_line(shopper, product_id).await? {
        log_audit(
            state,
            shopper,
            "cart_remove",
            Some("cart_lines"),
            Some(json!({ "product_id": product_id })),
        )
        .await;
    }

    Ok(ApiResponse::success(
        "Removed from cart",
        priced(state, shopper).await?,
        None,
    ))
}

pub async fn clear_cart(state: &AppState, shopper: &Shopper) -> AppResult<ApiResponse<PricedCart>> {
    state.carts.clear(shopper).await?;
    log_audit(state, shopper, "cart_clear", Some("cart_lines"), None).await;

    Ok(ApiResponse::success(
        "Cart cleared",
        priced(state, shopper).await?,
        None,
    ))
}

/// Attach a coupon after checking it against the current subtotal. On any
/// failure the previously attached coupon, if any, stays.
pub async fn apply_coupon(
    state: &AppState,
    shopper: &Shopper,
    payload: ApplyCouponRequest,
) -> AppResult<ApiResponse<PricedCart>> {
    let code = normalize_coupon_code(&payload.code)?;
    let coupon = state
        .promotions
        .coupon(&code)
        .await?
        .ok_or_else(|| AppError::CouponNotFound(code.clone()))?;

    let now = Utc::now();
    let current = CartSnapshot::load(state, shopper, now)
        .await?
        .price(&state.pricing, None, now);
    check_coupon(&coupon, current.totals.subtotal, now)?;

    state.carts.attach_coupon(shopper, &coupon.code).await?;

    tracing::debug!(shopper = %shopper, code = %coupon.code, "coupon attached");
    log_audit(
        state,
        shopper,
        "coupon_apply",
        Some("carts"),
        Some(json!({ "code": coupon.code })),
    )
    .await;

    Ok(ApiResponse::success(
        "Coupon applied",
        priced(state, shopper).await?,
        None,
    ))
}

pub async fn remove_coupon(
    state: &AppState,
    shopper: &Shopper,
) -> AppResult<ApiResponse<PricedCart>> {
    state.carts.detach_coupon(shopper).await?;

    Ok(ApiResponse::success(
        "Coupon removed",
        priced(state, shopper).await?,
        None,
    ))
}
