use utoipa::{
    Modify, OpenApi,
    openapi::{
        self, OpenApi as OpenApiSpec,
        security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    catalog::CatalogProduct,
    dto::{
        cart::{AddToCartRequest, ApplyCouponRequest, UpdateCartItemRequest},
        orders::{CheckoutRequest, OrderList, UpdateOrderStatusRequest},
    },
    models::{CartLine, DiscountKind, Order, OrderItem, OrderStatus, ShippingAddress},
    response::{ApiResponse, Meta},
    routes::{admin, cart, health, orders, params},
    services::{
        discount::AppliedCampaign,
        pricing::{CartCoupon, CartTotals, PricedCart, PricedLine, StockStatus, VendorSubtotal},
    },
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
        components.add_security_scheme(
            "session_token",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-Session-Token"))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        cart::get_cart,
        cart::add_to_cart,
        cart::update_cart_item,
        cart::remove_from_cart,
        cart::clear_cart,
        cart::apply_coupon,
        cart::remove_coupon,
        orders::list_orders,
        orders::checkout,
        orders::get_order,
        admin::update_order_status
    ),
    components(
        schemas(
            CatalogProduct,
            CartLine,
            DiscountKind,
            Order,
            OrderItem,
            OrderStatus,
            ShippingAddress,
            AppliedCampaign,
            StockStatus,
            PricedLine,
            VendorSubtotal,
            CartCoupon,
            CartTotals,
            PricedCart,
            AddToCartRequest,
            UpdateCartItemRequest,
            ApplyCouponRequest,
            CheckoutRequest,
            UpdateOrderStatusRequest,
            OrderList,
            params::Pagination,
            Meta,
            ApiResponse<PricedCart>,
            ApiResponse<Order>,
            ApiResponse<OrderList>
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Cart", description = "Cart, line and coupon endpoints"),
        (name = "Orders", description = "Checkout and order history"),
        (name = "Admin", description = "Order fulfilment endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_cart_and_order_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/cart",
            "/api/cart/items",
            "/api/cart/items/{product_id}",
            "/api/cart/coupon",
            "/api/orders",
            "/api/orders/checkout",
            "/api/orders/{order_number}",
            "/api/admin/orders/{order_number}/status",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
