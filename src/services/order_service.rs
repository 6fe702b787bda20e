use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{CheckoutRequest, OrderList},
    error::{AppError, AppResult},
    models::{Coupon, Order, OrderItem, OrderStatus, ShippingAddress, Shopper},
    money,
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    services::{cart_service::CartSnapshot, discount::check_coupon, pricing::PricedCart},
    state::AppState,
    store::OrderDraft,
};

const MAX_PAYMENT_METHOD_LEN: usize = 50;

pub async fn list_orders(
    state: &AppState,
    shopper: &Shopper,
    pagination: Pagination,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, per_page, offset) = pagination.normalize();
    let (items, total) = state.orders.list_for(shopper, per_page, offset).await?;

    let meta = Meta::new(page, per_page, total);
    Ok(ApiResponse::success("OK", OrderList { items }, Some(meta)))
}

pub async fn get_order(
    state: &AppState,
    shopper: &Shopper,
    order_number: &str,
) -> AppResult<ApiResponse<Order>> {
    let order = state
        .orders
        .find_for(shopper, order_number)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success("OK", order, None))
}

/// Turn the shopper's cart into a `pending` order.
///
/// Stock is checked here against a fresh catalog read and again, atomically,
/// when the repository decrements it; the second check is the one that counts.
pub async fn checkout(
    state: &AppState,
    shopper: &Shopper,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<Order>> {
    validate_checkout(&payload)?;

    let now = Utc::now();
    let snapshot = CartSnapshot::load(state, shopper, now).await?;
    if snapshot.lines.is_empty() {
        return Err(AppError::EmptyCart);
    }

    for line in &snapshot.lines {
        let available = snapshot
            .catalog
            .get(&line.product_id)
            .map(|p| p.stock)
            .unwrap_or(0);
        if available < line.quantity {
            return Err(AppError::InsufficientStock {
                product_id: line.product_id,
                available: available.max(0),
            });
        }
    }

    let priced = snapshot.price(&state.pricing, payload.tax.map(money::cents), now);
    if let Some(coupon) = &snapshot.coupon {
        check_coupon(coupon, priced.totals.subtotal, now)?;
    }
    if priced.totals.subtotal > money::max_amount() || priced.totals.total > money::max_amount() {
        return Err(AppError::ValidationFailed(format!(
            "order total must be at most {}",
            money::max_amount()
        )));
    }

    let order = build_order(
        shopper,
        payload.shipping_address,
        payload.payment_method,
        &priced,
        snapshot.coupon.as_ref(),
        now,
    )?;
    let order = state
        .orders
        .materialize(OrderDraft {
            shopper: shopper.clone(),
            order,
        })
        .await?;

    tracing::info!(
        shopper = %shopper,
        order_number = %order.order_number,
        total = %order.total,
        items = order.items.len(),
        "order placed"
    );
    log_audit(
        state,
        shopper,
        "checkout",
        Some("orders"),
        Some(json!({
            "order_number": order.order_number,
            "total": order.total.to_string(),
            "coupon": order.coupon_code,
        })),
    )
    .await;

    Ok(ApiResponse::success("Order created", order, None))
}

fn validate_checkout(payload: &CheckoutRequest) -> AppResult<()> {
    let address = &payload.shipping_address;
    let required = [
        ("recipient_name", &address.recipient_name),
        ("line1", &address.line1),
        ("city", &address.city),
        ("postal_code", &address.postal_code),
        ("country", &address.country),
        ("payment_method", &payload.payment_method),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(AppError::ValidationFailed(format!("{field} is required")));
        }
    }

    if payload.payment_method.trim().len() > MAX_PAYMENT_METHOD_LEN {
        return Err(AppError::ValidationFailed(format!(
            "payment_method must be at most {MAX_PAYMENT_METHOD_LEN} characters"
        )));
    }
    if payload.tax.is_some_and(|tax| tax < Decimal::ZERO) {
        return Err(AppError::ValidationFailed("tax must not be negative".into()));
    }
    if payload.tax.is_some_and(|tax| tax > money::max_amount()) {
        return Err(AppError::ValidationFailed(format!(
            "tax must be at most {}",
            money::max_amount()
        )));
    }
    Ok(())
}

/// `ORD-YYYYMMDD-` followed by twelve hex digits of the order id.
pub fn order_number(id: Uuid, now: DateTime<Utc>) -> String {
    let simple = id.simple().to_string().to_uppercase();
    format!("ORD-{}-{}", now.format("%Y%m%d"), &simple[..12])
}

fn build_order(
    shopper: &Shopper,
    shipping_address: ShippingAddress,
    payment_method: String,
    priced: &PricedCart,
    coupon: Option<&Coupon>,
    now: DateTime<Utc>,
) -> AppResult<Order> {
    let items = priced
        .lines
        .iter()
        .map(|line| {
            let (Some(unit_price), Some(name)) = (line.effective_unit_price, line.name.clone())
            else {
                return Err(AppError::InsufficientStock {
                    product_id: line.product_id,
                    available: 0,
                });
            };
            Ok(OrderItem {
                id: Uuid::new_v4(),
                product_id: line.product_id,
                vendor_id: line.vendor_id,
                product_name: name,
                product_image: line.image_url.clone(),
                unit_price,
                quantity: line.quantity,
                line_total: money::cents(unit_price * Decimal::from(line.quantity)),
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    let id = Uuid::new_v4();
    let totals = &priced.totals;
    Ok(Order {
        id,
        order_number: order_number(id, now),
        user_id: shopper.user_id(),
        shipping_address: trimmed(shipping_address),
        payment_method: payment_method.trim().to_string(),
        coupon_code: coupon.map(|c| c.code.clone()),
        subtotal: totals.subtotal,
        discount: totals.discount,
        shipping_cost: totals.shipping,
        tax: totals.tax,
        total: totals.total,
        status: OrderStatus::Pending,
        created_at: now,
        items,
    })
}

fn trimmed(address: ShippingAddress) -> ShippingAddress {
    let optional = |v: Option<String>| {
        v.map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    ShippingAddress {
        recipient_name: address.recipient_name.trim().to_string(),
        line1: address.line1.trim().to_string(),
        line2: optional(address.line2),
        city: address.city.trim().to_string(),
        region: optional(address.region),
        postal_code: address.postal_code.trim().to_string(),
        country: address.country.trim().to_string(),
        phone: optional(address.phone),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            shipping_address: ShippingAddress {
                recipient_name: "Ada Lovelace".into(),
                line1: "12 Analytical Way".into(),
                line2: Some("  ".into()),
                city: "London".into(),
                region: None,
                postal_code: "N1 9GU".into(),
                country: "GB".into(),
                phone: None,
            },
            payment_method: "card".into(),
            tax: None,
        }
    }

    #[test]
    fn order_numbers_carry_the_date_and_id_prefix() {
        let id = Uuid::parse_str("0f8e2a4c-1b3d-4e5f-8a9b-0c1d2e3f4a5b").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap();
        assert_eq!(order_number(id, now), "ORD-20260314-0F8E2A4C1B3D");
    }

    #[test]
    fn checkout_requires_address_and_payment_method() {
        assert!(validate_checkout(&request()).is_ok());

        let mut missing_city = request();
        missing_city.shipping_address.city = " ".into();
        assert!(matches!(
            validate_checkout(&missing_city),
            Err(AppError::ValidationFailed(msg)) if msg.contains("city")
        ));

        let mut no_payment = request();
        no_payment.payment_method = String::new();
        assert!(validate_checkout(&no_payment).is_err());

        let mut negative_tax = request();
        negative_tax.tax = Some(Decimal::new(-1, 2));
        assert!(validate_checkout(&negative_tax).is_err());
    }

    #[test]
    fn tax_is_capped_at_the_largest_storable_amount() {
        let mut at_cap = request();
        at_cap.tax = Some(money::max_amount());
        assert!(validate_checkout(&at_cap).is_ok());

        for tax in [money::max_amount() + Decimal::new(1, 2), Decimal::MAX] {
            let mut over = request();
            over.tax = Some(tax);
            assert!(matches!(
                validate_checkout(&over),
                Err(AppError::ValidationFailed(msg)) if msg.contains("tax")
            ));
        }
    }

    #[test]
    fn blank_optional_address_fields_are_dropped() {
        let address = trimmed(request().shipping_address);
        assert_eq!(address.line2, None);
        assert_eq!(address.recipient_name, "Ada Lovelace");
    }
}
