use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    audit::{AuditEntry, AuditTrail},
    catalog::{CatalogProduct, InventoryOracle},
    error::{AppError, AppResult},
    models::{Campaign, CartLine, Coupon, Order, OrderStatus, Shopper},
    store::{
        CartRepository, NewCartLine, OrderDraft, OrderRepository, PromotionRepository, lines_match,
        too_many_attributes,
    },
};

#[derive(Debug, Default)]
struct StoredCart {
    lines: Vec<CartLine>,
    coupon_code: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    products: HashMap<Uuid, CatalogProduct>,
    campaigns: Vec<Campaign>,
    coupons: HashMap<String, Coupon>,
    carts: HashMap<String, StoredCart>,
    /// Insertion order, paired with the owning shopper key.
    orders: Vec<(String, Order)>,
    audit: Vec<AuditEntry>,
}

/// Everything in one process behind a single lock.
///
/// Every trait method takes the lock once, so each call is atomic with
/// respect to every other call; `materialize` in particular validates and
/// applies all of its writes under the same guard.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_product(&self, product: CatalogProduct) {
        self.inner.lock().await.products.insert(product.id, product);
    }

    pub async fn put_campaign(&self, campaign: Campaign) {
        let mut state = self.inner.lock().await;
        state.campaigns.retain(|c| c.id != campaign.id);
        state.campaigns.push(campaign);
    }

    pub async fn put_coupon(&self, coupon: Coupon) {
        self.inner
            .lock()
            .await
            .coupons
            .insert(coupon.code.clone(), coupon);
    }

    pub async fn stock_of(&self, product_id: Uuid) -> Option<i32> {
        self.inner
            .lock()
            .await
            .products
            .get(&product_id)
            .map(|p| p.stock)
    }

    pub async fn coupon_uses(&self, code: &str) -> Option<i32> {
        self.inner.lock().await.coupons.get(code).map(|c| c.times_used)
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().await.audit.clone()
    }
}

#[async_trait]
impl InventoryOracle for MemoryStore {
    async fn lookup(&self, product_id: Uuid) -> AppResult<Option<CatalogProduct>> {
        Ok(self.inner.lock().await.products.get(&product_id).cloned())
    }

    async fn lookup_many(&self, product_ids: &[Uuid]) -> AppResult<HashMap<Uuid, CatalogProduct>> {
        let state = self.inner.lock().await;
        Ok(product_ids
            .iter()
            .filter_map(|id| state.products.get(id).map(|p| (*id, p.clone())))
            .collect())
    }
}

#[async_trait]
impl CartRepository for MemoryStore {
    async fn lines(&self, shopper: &Shopper) -> AppResult<Vec<CartLine>> {
        let state = self.inner.lock().await;
        Ok(state
            .carts
            .get(&shopper.key())
            .map(|cart| cart.lines.clone())
            .unwrap_or_default())
    }

    async fn add_line(&self, shopper: &Shopper, line: NewCartLine) -> AppResult<()> {
        let mut state = self.inner.lock().await;
        let cart = state.carts.entry(shopper.key()).or_default();

        match cart
            .lines
            .iter_mut()
            .find(|l| l.product_id == line.product_id)
        {
            Some(existing) => {
                let added = line
                    .attributes
                    .keys()
                    .filter(|k| !existing.attributes.contains_key(*k))
                    .count();
                if existing.attributes.len() + added > line.max_attributes {
                    return Err(too_many_attributes(line.max_attributes));
                }
                existing.quantity = existing
                    .quantity
                    .saturating_add(line.quantity)
                    .min(line.stock_cap);
                existing.vendor_id = line.vendor_id;
                existing.attributes.extend(line.attributes);
            }
            None if line.attributes.len() > line.max_attributes => {
                return Err(too_many_attributes(line.max_attributes));
            }
            None => cart.lines.push(CartLine {
                product_id: line.product_id,
                vendor_id: line.vendor_id,
                quantity: line.quantity.min(line.stock_cap),
                unit_price_snapshot: line.unit_price_snapshot,
                attributes: line.attributes,
                added_at: Utc::now(),
            }),
        }

        Ok(())
    }

    async fn set_quantity(
        &self,
        shopper: &Shopper,
        product_id: Uuid,
        quantity: i32,
    ) -> AppResult<bool> {
        let mut state = self.inner.lock().await;
        let line = state
            .carts
            .get_mut(&shopper.key())
            .and_then(|cart| cart.lines.iter_mut().find(|l| l.product_id == product_id));
        match line {
            Some(line) => {
                line.quantity = quantity;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_line(&self, shopper: &Shopper, product_id: Uuid) -> AppResult<bool> {
        let mut state = self.inner.lock().await;
        let Some(cart) = state.carts.get_mut(&shopper.key()) else {
            return Ok(false);
        };
        let before = cart.lines.len();
        cart.lines.retain(|l| l.product_id != product_id);
        Ok(cart.lines.len() != before)
    }

    async fn clear(&self, shopper: &Shopper) -> AppResult<()> {
        self.inner.lock().await.carts.remove(&shopper.key());
        Ok(())
    }

    async fn coupon_code(&self, shopper: &Shopper) -> AppResult<Option<String>> {
        let state = self.inner.lock().await;
        Ok(state
            .carts
            .get(&shopper.key())
            .and_then(|cart| cart.coupon_code.clone()))
    }

    async fn attach_coupon(&self, shopper: &Shopper, code: &str) -> AppResult<()> {
        let mut state = self.inner.lock().await;
        state.carts.entry(shopper.key()).or_default().coupon_code = Some(code.to_string());
        Ok(())
    }

    async fn detach_coupon(&self, shopper: &Shopper) -> AppResult<()> {
        let mut state = self.inner.lock().await;
        if let Some(cart) = state.carts.get_mut(&shopper.key()) {
            cart.coupon_code = None;
        }
        Ok(())
    }
}

#[async_trait]
impl PromotionRepository for MemoryStore {
    async fn campaigns_for(
        &self,
        product_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Campaign>> {
        let state = self.inner.lock().await;
        Ok(state
            .campaigns
            .iter()
            .filter(|c| c.is_effective(now) && product_ids.iter().any(|id| c.covers(*id)))
            .cloned()
            .collect())
    }

    async fn coupon(&self, code: &str) -> AppResult<Option<Coupon>> {
        Ok(self.inner.lock().await.coupons.get(code).cloned())
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn materialize(&self, draft: OrderDraft) -> AppResult<Order> {
        let OrderDraft { shopper, order } = draft;
        let key = shopper.key();
        let mut state = self.inner.lock().await;

        let current: Vec<(Uuid, i32)> = state
            .carts
            .get(&key)
            .map(|cart| {
                cart.lines
                    .iter()
                    .map(|l| (l.product_id, l.quantity))
                    .collect()
            })
            .unwrap_or_default();
        if !lines_match(&current, &order.items) {
            return Err(AppError::ValidationFailed(
                "cart changed during checkout; review it and try again".into(),
            ));
        }

        // Validate everything before touching anything.
        for item in &order.items {
            let available = state
                .products
                .get(&item.product_id)
                .map(|p| p.stock)
                .unwrap_or(0);
            if available < item.quantity {
                return Err(AppError::InsufficientStock {
                    product_id: item.product_id,
                    available,
                });
            }
        }
        if let Some(code) = &order.coupon_code {
            let exhausted = state
                .coupons
                .get(code)
                .is_none_or(|c| c.usage_limit.is_some_and(|limit| c.times_used >= limit));
            if exhausted {
                return Err(AppError::CouponUsageExceeded(code.clone()));
            }
        }

        for item in &order.items {
            if let Some(product) = state.products.get_mut(&item.product_id) {
                product.stock -= item.quantity;
            }
        }
        if let Some(coupon) = order
            .coupon_code
            .as_ref()
            .and_then(|code| state.coupons.get_mut(code))
        {
            coupon.times_used += 1;
        }
        state.carts.remove(&key);
        state.orders.push((key, order.clone()));

        Ok(order)
    }

    async fn list_for(
        &self,
        shopper: &Shopper,
        limit: u64,
        offset: u64,
    ) -> AppResult<(Vec<Order>, u64)> {
        let key = shopper.key();
        let state = self.inner.lock().await;
        let mut mine: Vec<&Order> = state
            .orders
            .iter()
            .filter(|(owner, _)| *owner == key)
            .map(|(_, order)| order)
            .collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = mine.len() as u64;
        let page = mine
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn find_for(&self, shopper: &Shopper, order_number: &str) -> AppResult<Option<Order>> {
        let key = shopper.key();
        let state = self.inner.lock().await;
        Ok(state
            .orders
            .iter()
            .find(|(owner, order)| *owner == key && order.order_number == order_number)
            .map(|(_, order)| order.clone()))
    }

    async fn find_by_number(&self, order_number: &str) -> AppResult<Option<Order>> {
        let state = self.inner.lock().await;
        Ok(state
            .orders
            .iter()
            .find(|(_, order)| order.order_number == order_number)
            .map(|(_, order)| order.clone()))
    }

    async fn transition(
        &self,
        order_number: &str,
        from: OrderStatus,
        to: OrderStatus,
    ) -> AppResult<bool> {
        let mut state = self.inner.lock().await;
        let order = state
            .orders
            .iter_mut()
            .map(|(_, order)| order)
            .find(|order| order.order_number == order_number && order.status == from);
        match order {
            Some(order) => {
                order.status = to;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl AuditTrail for MemoryStore {
    async fn record(&self, entry: AuditEntry) -> AppResult<()> {
        self.inner.lock().await.audit.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::models::{OrderItem, ShippingAddress};

    fn product(stock: i32) -> CatalogProduct {
        CatalogProduct {
            id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            name: "Mug".into(),
            image_url: None,
            price: Decimal::new(1000, 2),
            sale_price: None,
            stock,
        }
    }

    fn new_line(p: &CatalogProduct, quantity: i32) -> NewCartLine {
        NewCartLine {
            product_id: p.id,
            vendor_id: p.vendor_id,
            quantity,
            stock_cap: p.stock,
            unit_price_snapshot: p.price,
            attributes: Default::default(),
            max_attributes: 20,
        }
    }

    fn draft(shopper: &Shopper, p: &CatalogProduct, quantity: i32) -> OrderDraft {
        let line_total = p.price * Decimal::from(quantity);
        OrderDraft {
            shopper: shopper.clone(),
            order: Order {
                id: Uuid::new_v4(),
                order_number: format!("ORD-TEST-{}", Uuid::new_v4().simple()),
                user_id: shopper.user_id(),
                shipping_address: ShippingAddress {
                    recipient_name: "Ada".into(),
                    line1: "1 Main St".into(),
                    line2: None,
                    city: "Springfield".into(),
                    region: None,
                    postal_code: "12345".into(),
                    country: "US".into(),
                    phone: None,
                },
                payment_method: "card".into(),
                coupon_code: None,
                subtotal: line_total,
                discount: Decimal::ZERO,
                shipping_cost: Decimal::ZERO,
                tax: Decimal::ZERO,
                total: line_total,
                status: OrderStatus::Pending,
                created_at: Utc::now(),
                items: vec![OrderItem {
                    id: Uuid::new_v4(),
                    product_id: p.id,
                    vendor_id: p.vendor_id,
                    product_name: p.name.clone(),
                    product_image: None,
                    unit_price: p.price,
                    quantity,
                    line_total,
                }],
            },
        }
    }

    #[tokio::test]
    async fn repeated_adds_merge_and_clamp_to_stock() -> AppResult<()> {
        let store = MemoryStore::new();
        let p = product(5);
        let shopper = Shopper::Guest("tok".into());

        store.add_line(&shopper, new_line(&p, 3)).await?;
        store.add_line(&shopper, new_line(&p, 4)).await?;

        let lines = store.lines(&shopper).await?;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 5);
        Ok(())
    }

    #[tokio::test]
    async fn merged_attributes_respect_the_cap() -> AppResult<()> {
        let store = MemoryStore::new();
        let p = product(5);
        let shopper = Shopper::Guest("tok".into());
        let with_keys = |keys: &[&str]| {
            let mut line = new_line(&p, 1);
            line.max_attributes = 2;
            line.attributes = keys.iter().map(|k| (k.to_string(), "x".to_string())).collect();
            line
        };

        store.add_line(&shopper, with_keys(&["size", "colour"])).await?;
        // Overwriting known keys does not grow the map.
        store.add_line(&shopper, with_keys(&["size"])).await?;
        let err = store
            .add_line(&shopper, with_keys(&["fit"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationFailed(_)));

        let lines = store.lines(&shopper).await?;
        assert_eq!(lines[0].attributes.len(), 2);
        assert_eq!(lines[0].quantity, 2);
        Ok(())
    }

    #[tokio::test]
    async fn materialize_rejects_a_cart_that_changed() -> AppResult<()> {
        let store = MemoryStore::new();
        let p = product(5);
        store.put_product(p.clone()).await;
        let shopper = Shopper::Guest("tok".into());
        store.add_line(&shopper, new_line(&p, 2)).await?;

        let err = store.materialize(draft(&shopper, &p, 3)).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationFailed(_)));
        assert_eq!(store.stock_of(p.id).await, Some(5));
        Ok(())
    }

    #[tokio::test]
    async fn materialize_leaves_no_trace_when_stock_is_short() -> AppResult<()> {
        let store = MemoryStore::new();
        let mut p = product(5);
        let shopper = Shopper::Guest("tok".into());
        store.add_line(&shopper, new_line(&p, 3)).await?;
        p.stock = 2;
        store.put_product(p.clone()).await;

        let err = store.materialize(draft(&shopper, &p, 3)).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientStock { available: 2, .. }
        ));
        assert_eq!(store.stock_of(p.id).await, Some(2));
        assert_eq!(store.lines(&shopper).await?.len(), 1);
        assert_eq!(store.list_for(&shopper, 10, 0).await?.1, 0);
        Ok(())
    }

    #[tokio::test]
    async fn transition_is_compare_and_set() -> AppResult<()> {
        let store = MemoryStore::new();
        let p = product(5);
        store.put_product(p.clone()).await;
        let shopper = Shopper::User(Uuid::new_v4());
        store.add_line(&shopper, new_line(&p, 1)).await?;
        let order = store.materialize(draft(&shopper, &p, 1)).await?;

        assert!(
            store
                .transition(&order.order_number, OrderStatus::Pending, OrderStatus::Processing)
                .await?
        );
        assert!(
            !store
                .transition(&order.order_number, OrderStatus::Pending, OrderStatus::Cancelled)
                .await?
        );
        let stored = store.find_by_number(&order.order_number).await?;
        assert_eq!(stored.map(|o| o.status), Some(OrderStatus::Processing));
        Ok(())
    }
}
