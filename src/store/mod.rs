//! Persistence seams for carts, promotions and orders.
//!
//! Services only see these traits. [`postgres::PgStore`] backs them with
//! sea-orm/sqlx; [`memory::MemoryStore`] keeps everything behind one mutex for
//! local runs and tests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Campaign, CartLine, Coupon, LineAttributes, Order, OrderItem, OrderStatus, Shopper},
};

pub mod memory;
pub mod postgres;

pub type DynCartRepository = Arc<dyn CartRepository + Send + Sync>;
pub type DynPromotionRepository = Arc<dyn PromotionRepository + Send + Sync>;
pub type DynOrderRepository = Arc<dyn OrderRepository + Send + Sync>;

#[derive(Debug, Clone)]
pub struct NewCartLine {
    pub product_id: Uuid,
    pub vendor_id: Uuid,
    pub quantity: i32,
    /// Upper bound for the resulting line quantity.
    pub stock_cap: i32,
    pub unit_price_snapshot: Decimal,
    pub attributes: LineAttributes,
    /// Most attribute keys the merged line may carry.
    pub max_attributes: usize,
}

#[async_trait]
pub trait CartRepository {
    async fn lines(&self, shopper: &Shopper) -> AppResult<Vec<CartLine>>;

    /// Insert a line, or add to the existing quantity, clamped to `stock_cap`.
    /// Must be a single atomic step so concurrent adds never lose an update.
    /// Fails with `ValidationFailed`, changing nothing, when the merged
    /// attributes would exceed `max_attributes`.
    async fn add_line(&self, shopper: &Shopper, line: NewCartLine) -> AppResult<()>;

    /// Overwrite a line's quantity. Returns `false` when the line does not exist.
    async fn set_quantity(&self, shopper: &Shopper, product_id: Uuid, quantity: i32)
    -> AppResult<bool>;

    /// Returns `false` when there was nothing to remove.
    async fn remove_line(&self, shopper: &Shopper, product_id: Uuid) -> AppResult<bool>;

    /// Drop every line and the attached coupon.
    async fn clear(&self, shopper: &Shopper) -> AppResult<()>;

    async fn coupon_code(&self, shopper: &Shopper) -> AppResult<Option<String>>;

    async fn attach_coupon(&self, shopper: &Shopper, code: &str) -> AppResult<()>;

    async fn detach_coupon(&self, shopper: &Shopper) -> AppResult<()>;
}

#[async_trait]
pub trait PromotionRepository {
    /// Campaigns in force at `now` that cover any of `product_ids`.
    async fn campaigns_for(
        &self,
        product_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Campaign>>;

    /// Look up a coupon by its canonical (upper-case) code.
    async fn coupon(&self, code: &str) -> AppResult<Option<Coupon>>;
}

/// A fully priced order waiting to be persisted.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub shopper: Shopper,
    pub order: Order,
}

#[async_trait]
pub trait OrderRepository {
    /// Persist the order in one atomic unit of work: confirm the cart still
    /// holds exactly the drafted lines, decrement stock for every item,
    /// consume a coupon use, insert the order with its items and empty the
    /// cart. Any failure leaves no trace.
    async fn materialize(&self, draft: OrderDraft) -> AppResult<Order>;

    /// Newest first, with the total count.
    async fn list_for(
        &self,
        shopper: &Shopper,
        limit: u64,
        offset: u64,
    ) -> AppResult<(Vec<Order>, u64)>;

    async fn find_for(&self, shopper: &Shopper, order_number: &str) -> AppResult<Option<Order>>;

    async fn find_by_number(&self, order_number: &str) -> AppResult<Option<Order>>;

    /// Compare-and-set on the order status. Returns `false` when the order is
    /// no longer in `from`.
    async fn transition(
        &self,
        order_number: &str,
        from: OrderStatus,
        to: OrderStatus,
    ) -> AppResult<bool>;
}

pub(crate) fn too_many_attributes(max: usize) -> AppError {
    AppError::ValidationFailed(format!("at most {max} attributes per line"))
}

/// Whether the stored cart still matches what the order was priced from.
pub(crate) fn lines_match(lines: &[(Uuid, i32)], items: &[OrderItem]) -> bool {
    let mut stored: Vec<(Uuid, i32)> = lines.to_vec();
    let mut drafted: Vec<(Uuid, i32)> = items.iter().map(|i| (i.product_id, i.quantity)).collect();
    stored.sort();
    drafted.sort();
    stored == drafted
}
