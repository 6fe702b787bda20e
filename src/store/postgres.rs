use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
    prelude::DateTimeWithTimeZone,
    sea_query::{Expr, LockType, OnConflict},
};
use uuid::Uuid;

use crate::{
    catalog::{CatalogProduct, InventoryOracle},
    db::{DbPool, OrmConn},
    entity::{
        CampaignProducts, Campaigns, CartLines, Carts, Coupons, OrderItems, Orders, Products,
        campaign_products::Column as LinkCol,
        campaigns::{Column as CampaignCol, Model as CampaignModel},
        cart_lines::{Column as LineCol, Model as LineModel},
        carts::{ActiveModel as CartActive, Column as CartCol},
        coupons::{Column as CouponCol, Model as CouponModel},
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol, Model as OrderItemModel},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Model as OrderModel},
        products::{Column as ProdCol, Model as ProductModel},
    },
    error::{AppError, AppResult},
    models::{
        Campaign, CampaignStatus, CartLine, Coupon, DiscountKind, Order, OrderItem, OrderStatus,
        ShippingAddress, Shopper,
    },
    store::{
        CartRepository, NewCartLine, OrderDraft, OrderRepository, PromotionRepository, lines_match,
        too_many_attributes,
    },
};

/// Postgres-backed catalog, cart, promotion and order storage.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
    orm: OrmConn,
}

impl PgStore {
    pub fn new(pool: DbPool, orm: OrmConn) -> Self {
        Self { pool, orm }
    }

    async fn with_items(&self, rows: Vec<OrderModel>) -> AppResult<Vec<Order>> {
        let ids: Vec<Uuid> = rows.iter().map(|o| o.id).collect();
        let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        if !ids.is_empty() {
            for item in OrderItems::find()
                .filter(OrderItemCol::OrderId.is_in(ids))
                .order_by_asc(OrderItemCol::Position)
                .order_by_asc(OrderItemCol::Id)
                .all(&self.orm)
                .await?
            {
                items
                    .entry(item.order_id)
                    .or_default()
                    .push(order_item_from_entity(item));
            }
        }

        rows.into_iter()
            .map(|row| {
                let lines = items.remove(&row.id).unwrap_or_default();
                order_from_entity(row, lines)
            })
            .collect()
    }
}

#[async_trait]
impl InventoryOracle for PgStore {
    async fn lookup(&self, product_id: Uuid) -> AppResult<Option<CatalogProduct>> {
        Ok(Products::find_by_id(product_id)
            .one(&self.orm)
            .await?
            .map(product_from_entity))
    }

    async fn lookup_many(&self, product_ids: &[Uuid]) -> AppResult<HashMap<Uuid, CatalogProduct>> {
        if product_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = Products::find()
            .filter(ProdCol::Id.is_in(product_ids.iter().copied()))
            .all(&self.orm)
            .await?;
        Ok(rows
            .into_iter()
            .map(product_from_entity)
            .map(|p| (p.id, p))
            .collect())
    }
}

#[async_trait]
impl CartRepository for PgStore {
    async fn lines(&self, shopper: &Shopper) -> AppResult<Vec<CartLine>> {
        CartLines::find()
            .filter(LineCol::ShopperKey.eq(shopper.key()))
            .order_by_asc(LineCol::AddedAt)
            .all(&self.orm)
            .await?
            .into_iter()
            .map(line_from_entity)
            .collect()
    }

    async fn add_line(&self, shopper: &Shopper, line: NewCartLine) -> AppResult<()> {
        let attributes = serde_json::to_value(&line.attributes).map_err(anyhow::Error::from)?;

        if line.attributes.len() > line.max_attributes {
            return Err(too_many_attributes(line.max_attributes));
        }

        // Increment in place so two concurrent adds both count. The WHERE on
        // the update leaves the row untouched when the merge would exceed the cap.
        let result = sqlx::query(
            r#"
            INSERT INTO cart_lines
                (id, shopper_key, product_id, vendor_id, quantity, unit_price_snapshot, attributes)
            VALUES ($1, $2, $3, $4, LEAST($5, $6), $7, $8)
            ON CONFLICT (shopper_key, product_id) DO UPDATE
            SET quantity = LEAST(cart_lines.quantity::BIGINT + $5, $6),
                vendor_id = EXCLUDED.vendor_id,
                attributes = cart_lines.attributes || EXCLUDED.attributes
            WHERE (
                SELECT COUNT(*) FROM jsonb_object_keys(cart_lines.attributes || EXCLUDED.attributes)
            ) <= $9
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(shopper.key())
        .bind(line.product_id)
        .bind(line.vendor_id)
        .bind(line.quantity)
        .bind(line.stock_cap)
        .bind(line.unit_price_snapshot)
        .bind(attributes)
        .bind(i64::try_from(line.max_attributes).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(too_many_attributes(line.max_attributes));
        }
        Ok(())
    }

    async fn set_quantity(
        &self,
        shopper: &Shopper,
        product_id: Uuid,
        quantity: i32,
    ) -> AppResult<bool> {
        let result = CartLines::update_many()
            .col_expr(LineCol::Quantity, Expr::value(quantity))
            .filter(LineCol::ShopperKey.eq(shopper.key()))
            .filter(LineCol::ProductId.eq(product_id))
            .exec(&self.orm)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn remove_line(&self, shopper: &Shopper, product_id: Uuid) -> AppResult<bool> {
        let result = CartLines::delete_many()
            .filter(LineCol::ShopperKey.eq(shopper.key()))
            .filter(LineCol::ProductId.eq(product_id))
            .exec(&self.orm)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn clear(&self, shopper: &Shopper) -> AppResult<()> {
        let txn = self.orm.begin().await?;
        CartLines::delete_many()
            .filter(LineCol::ShopperKey.eq(shopper.key()))
            .exec(&txn)
            .await?;
        Carts::delete_by_id(shopper.key()).exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn coupon_code(&self, shopper: &Shopper) -> AppResult<Option<String>> {
        Ok(Carts::find_by_id(shopper.key())
            .one(&self.orm)
            .await?
            .and_then(|cart| cart.coupon_code))
    }

    async fn attach_coupon(&self, shopper: &Shopper, code: &str) -> AppResult<()> {
        let header = CartActive {
            shopper_key: Set(shopper.key()),
            coupon_code: Set(Some(code.to_string())),
            updated_at: Set(Utc::now().into()),
        };
        Carts::insert(header)
            .on_conflict(
                OnConflict::column(CartCol::ShopperKey)
                    .update_columns([CartCol::CouponCode, CartCol::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.orm)
            .await?;
        Ok(())
    }

    async fn detach_coupon(&self, shopper: &Shopper) -> AppResult<()> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        Carts::update_many()
            .col_expr(CartCol::CouponCode, Expr::value(Option::<String>::None))
            .col_expr(CartCol::UpdatedAt, Expr::value(now))
            .filter(CartCol::ShopperKey.eq(shopper.key()))
            .exec(&self.orm)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PromotionRepository for PgStore {
    async fn campaigns_for(
        &self,
        product_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Campaign>> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }

        let links = CampaignProducts::find()
            .filter(LinkCol::ProductId.is_in(product_ids.iter().copied()))
            .all(&self.orm)
            .await?;
        if links.is_empty() {
            return Ok(Vec::new());
        }

        let campaign_ids: BTreeSet<Uuid> = links.iter().map(|l| l.campaign_id).collect();
        let now: DateTimeWithTimeZone = now.into();
        let rows = Campaigns::find()
            .filter(CampaignCol::Id.is_in(campaign_ids))
            .filter(CampaignCol::Status.eq(CampaignStatus::Active.as_str()))
            .filter(CampaignCol::StartDate.lte(now))
            .filter(CampaignCol::EndDate.gt(now))
            .all(&self.orm)
            .await?;

        rows.into_iter()
            .map(|row| {
                let products = links
                    .iter()
                    .filter(|l| l.campaign_id == row.id)
                    .map(|l| l.product_id)
                    .collect();
                campaign_from_entity(row, products)
            })
            .collect()
    }

    async fn coupon(&self, code: &str) -> AppResult<Option<Coupon>> {
        Coupons::find_by_id(code.to_string())
            .one(&self.orm)
            .await?
            .map(coupon_from_entity)
            .transpose()
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn materialize(&self, draft: OrderDraft) -> AppResult<Order> {
        let OrderDraft { shopper, order } = draft;
        let key = shopper.key();
        let txn = self.orm.begin().await?;

        let current: Vec<(Uuid, i32)> = CartLines::find()
            .filter(LineCol::ShopperKey.eq(key.clone()))
            .lock(LockType::Update)
            .all(&txn)
            .await?
            .into_iter()
            .map(|line| (line.product_id, line.quantity))
            .collect();
        if !lines_match(&current, &order.items) {
            return Err(AppError::ValidationFailed(
                "cart changed during checkout; review it and try again".into(),
            ));
        }

        // Stable lock order keeps concurrent checkouts from deadlocking.
        let mut decrements: Vec<(Uuid, i32)> = order
            .items
            .iter()
            .map(|i| (i.product_id, i.quantity))
            .collect();
        decrements.sort();
        for (product_id, quantity) in decrements {
            let result = Products::update_many()
                .col_expr(ProdCol::Stock, Expr::col(ProdCol::Stock).sub(quantity))
                .filter(ProdCol::Id.eq(product_id))
                .filter(ProdCol::Stock.gte(quantity))
                .exec(&txn)
                .await?;
            if result.rows_affected == 0 {
                let available = Products::find_by_id(product_id)
                    .one(&txn)
                    .await?
                    .map(|p| p.stock)
                    .unwrap_or(0);
                return Err(AppError::InsufficientStock {
                    product_id,
                    available,
                });
            }
        }

        if let Some(code) = &order.coupon_code {
            let result = Coupons::update_many()
                .col_expr(CouponCol::TimesUsed, Expr::col(CouponCol::TimesUsed).add(1))
                .filter(CouponCol::Code.eq(code.clone()))
                .filter(
                    Condition::any()
                        .add(CouponCol::UsageLimit.is_null())
                        .add(Expr::col(CouponCol::TimesUsed).lt(Expr::col(CouponCol::UsageLimit))),
                )
                .exec(&txn)
                .await?;
            if result.rows_affected == 0 {
                return Err(AppError::CouponUsageExceeded(code.clone()));
            }
        }

        let address = &order.shipping_address;
        let created_at: DateTimeWithTimeZone = order.created_at.into();
        OrderActive {
            id: Set(order.id),
            order_number: Set(order.order_number.clone()),
            shopper_key: Set(key.clone()),
            user_id: Set(order.user_id),
            recipient_name: Set(address.recipient_name.clone()),
            address_line1: Set(address.line1.clone()),
            address_line2: Set(address.line2.clone()),
            city: Set(address.city.clone()),
            region: Set(address.region.clone()),
            postal_code: Set(address.postal_code.clone()),
            country: Set(address.country.clone()),
            phone: Set(address.phone.clone()),
            payment_method: Set(order.payment_method.clone()),
            coupon_code: Set(order.coupon_code.clone()),
            subtotal: Set(order.subtotal),
            discount: Set(order.discount),
            shipping_cost: Set(order.shipping_cost),
            tax: Set(order.tax),
            total: Set(order.total),
            status: Set(order.status.as_str().to_string()),
            created_at: Set(created_at),
            updated_at: Set(created_at),
        }
        .insert(&txn)
        .await?;

        for (position, item) in (0_i32..).zip(&order.items) {
            OrderItemActive {
                id: Set(item.id),
                order_id: Set(order.id),
                product_id: Set(item.product_id),
                vendor_id: Set(item.vendor_id),
                product_name: Set(item.product_name.clone()),
                product_image: Set(item.product_image.clone()),
                unit_price: Set(item.unit_price),
                quantity: Set(item.quantity),
                line_total: Set(item.line_total),
                position: Set(position),
                created_at: Set(created_at),
            }
            .insert(&txn)
            .await?;
        }

        // Only the ordered lines: a line added while this ran was never locked
        // above and belongs to the shopper's next cart.
        let ordered: Vec<Uuid> = order.items.iter().map(|i| i.product_id).collect();
        CartLines::delete_many()
            .filter(LineCol::ShopperKey.eq(key.clone()))
            .filter(LineCol::ProductId.is_in(ordered))
            .exec(&txn)
            .await?;
        Carts::delete_by_id(key).exec(&txn).await?;

        txn.commit().await?;
        Ok(order)
    }

    async fn list_for(
        &self,
        shopper: &Shopper,
        limit: u64,
        offset: u64,
    ) -> AppResult<(Vec<Order>, u64)> {
        let finder = Orders::find()
            .filter(OrderCol::ShopperKey.eq(shopper.key()))
            .order_by_desc(OrderCol::CreatedAt);

        let total = finder.clone().count(&self.orm).await?;
        let rows = finder.limit(limit).offset(offset).all(&self.orm).await?;

        Ok((self.with_items(rows).await?, total))
    }

    async fn find_for(&self, shopper: &Shopper, order_number: &str) -> AppResult<Option<Order>> {
        let rows = Orders::find()
            .filter(
                Condition::all()
                    .add(OrderCol::ShopperKey.eq(shopper.key()))
                    .add(OrderCol::OrderNumber.eq(order_number)),
            )
            .all(&self.orm)
            .await?;
        Ok(self.with_items(rows).await?.pop())
    }

    async fn find_by_number(&self, order_number: &str) -> AppResult<Option<Order>> {
        let rows = Orders::find()
            .filter(OrderCol::OrderNumber.eq(order_number))
            .all(&self.orm)
            .await?;
        Ok(self.with_items(rows).await?.pop())
    }

    async fn transition(
        &self,
        order_number: &str,
        from: OrderStatus,
        to: OrderStatus,
    ) -> AppResult<bool> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let result = Orders::update_many()
            .col_expr(OrderCol::Status, Expr::value(to.as_str()))
            .col_expr(OrderCol::UpdatedAt, Expr::value(now))
            .filter(OrderCol::OrderNumber.eq(order_number))
            .filter(OrderCol::Status.eq(from.as_str()))
            .exec(&self.orm)
            .await?;
        Ok(result.rows_affected == 1)
    }
}

fn product_from_entity(model: ProductModel) -> CatalogProduct {
    CatalogProduct {
        id: model.id,
        vendor_id: model.vendor_id,
        name: model.name,
        image_url: model.image_url,
        price: model.price,
        sale_price: model.sale_price,
        stock: model.stock,
    }
}

fn line_from_entity(model: LineModel) -> AppResult<CartLine> {
    let attributes = serde_json::from_value(model.attributes).map_err(anyhow::Error::from)?;
    Ok(CartLine {
        product_id: model.product_id,
        vendor_id: model.vendor_id,
        quantity: model.quantity,
        unit_price_snapshot: model.unit_price_snapshot,
        attributes,
        added_at: model.added_at.with_timezone(&Utc),
    })
}

fn discount_kind(value: &str) -> AppResult<DiscountKind> {
    DiscountKind::parse(value)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("unknown discount type `{value}`")))
}

fn campaign_from_entity(model: CampaignModel, product_ids: Vec<Uuid>) -> AppResult<Campaign> {
    let status = CampaignStatus::parse(&model.status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("unknown campaign status `{}`", model.status))
    })?;
    Ok(Campaign {
        id: model.id,
        name: model.name,
        status,
        start_date: model.start_date.with_timezone(&Utc),
        end_date: model.end_date.with_timezone(&Utc),
        discount_kind: discount_kind(&model.discount_type)?,
        discount_value: model.discount_value,
        product_ids,
    })
}

fn coupon_from_entity(model: CouponModel) -> AppResult<Coupon> {
    Ok(Coupon {
        discount_kind: discount_kind(&model.discount_type)?,
        code: model.code,
        discount_value: model.discount_value,
        min_subtotal: model.min_subtotal,
        expires_at: model.expires_at.map(|dt| dt.with_timezone(&Utc)),
        usage_limit: model.usage_limit,
        times_used: model.times_used,
    })
}

fn order_from_entity(model: OrderModel, items: Vec<OrderItem>) -> AppResult<Order> {
    let status = OrderStatus::parse(&model.status).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("unknown order status `{}`", model.status))
    })?;
    Ok(Order {
        id: model.id,
        order_number: model.order_number,
        user_id: model.user_id,
        shipping_address: ShippingAddress {
            recipient_name: model.recipient_name,
            line1: model.address_line1,
            line2: model.address_line2,
            city: model.city,
            region: model.region,
            postal_code: model.postal_code,
            country: model.country,
            phone: model.phone,
        },
        payment_method: model.payment_method,
        coupon_code: model.coupon_code,
        subtotal: model.subtotal,
        discount: model.discount,
        shipping_cost: model.shipping_cost,
        tax: model.tax,
        total: model.total,
        status,
        created_at: model.created_at.with_timezone(&Utc),
        items,
    })
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        product_id: model.product_id,
        vendor_id: model.vendor_id,
        product_name: model.product_name,
        product_image: model.product_image,
        unit_price: model.unit_price,
        quantity: model.quantity,
        line_total: model.line_total,
    }
}
