//! Cart pricing.
//!
//! [`price_cart`] is the single place where subtotal, coupon discount, shipping
//! and total are derived. It is a pure function of its input: the same lines,
//! catalog snapshot, promotions and clock always yield the same projection.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    catalog::CatalogProduct,
    models::{Campaign, CartLine, Coupon, DiscountKind, LineAttributes},
    money,
    services::discount::{self, AppliedCampaign},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingPolicy {
    pub flat_shipping_fee: Decimal,
    pub free_shipping_threshold: Decimal,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            flat_shipping_fee: Decimal::new(599, 2),
            free_shipping_threshold: Decimal::new(5000, 2),
        }
    }
}

impl PricingPolicy {
    pub fn shipping_for(&self, subtotal: Decimal) -> Decimal {
        if subtotal < self.free_shipping_threshold {
            money::cents(self.flat_shipping_fee)
        } else {
            money::cents(Decimal::ZERO)
        }
    }
}

/// Availability of a line against current stock. Reported, never acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    Insufficient { available: i32 },
    OutOfStock,
    /// The product no longer exists in the catalog.
    Unavailable,
}

impl StockStatus {
    pub fn assess(product: Option<&CatalogProduct>, quantity: i32) -> Self {
        match product {
            None => StockStatus::Unavailable,
            Some(p) if p.stock <= 0 => StockStatus::OutOfStock,
            Some(p) if p.stock < quantity => StockStatus::Insufficient { available: p.stock },
            Some(_) => StockStatus::InStock,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub vendor_id: Uuid,
    pub name: Option<String>,
    pub image_url: Option<String>,
    pub quantity: i32,
    pub attributes: LineAttributes,
    #[schema(value_type = String)]
    pub unit_price_snapshot: Decimal,
    #[schema(value_type = Option<String>)]
    pub list_price: Option<Decimal>,
    /// Unit price after campaign discount, before any coupon.
    #[schema(value_type = Option<String>)]
    pub effective_unit_price: Option<Decimal>,
    #[schema(value_type = String)]
    pub line_total: Decimal,
    pub campaign: Option<AppliedCampaign>,
    pub price_changed: bool,
    pub stock_status: StockStatus,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct VendorSubtotal {
    pub vendor_id: Uuid,
    pub item_count: i64,
    #[schema(value_type = String)]
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CartCoupon {
    pub code: String,
    pub discount_kind: DiscountKind,
    #[schema(value_type = String)]
    pub discount_value: Decimal,
    pub eligible: bool,
    /// Why an attached coupon currently grants nothing.
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CartTotals {
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    #[schema(value_type = String)]
    pub discount: Decimal,
    /// Informational; already reflected in `subtotal`.
    #[schema(value_type = String)]
    pub campaign_savings: Decimal,
    #[schema(value_type = String)]
    pub shipping: Decimal,
    #[schema(value_type = String)]
    pub tax: Decimal,
    #[schema(value_type = String)]
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub vendors: Vec<VendorSubtotal>,
    pub coupon: Option<CartCoupon>,
    pub item_count: i64,
    pub totals: CartTotals,
}

impl PricedCart {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, product_id: Uuid) -> Option<&PricedLine> {
        self.lines.iter().find(|l| l.product_id == product_id)
    }
}

pub struct PricingInput<'a> {
    pub lines: &'a [CartLine],
    pub catalog: &'a HashMap<Uuid, CatalogProduct>,
    pub campaigns: &'a [Campaign],
    pub coupon: Option<&'a Coupon>,
    pub tax: Option<Decimal>,
    pub policy: &'a PricingPolicy,
    pub now: DateTime<Utc>,
}

pub fn price_cart(input: PricingInput<'_>) -> PricedCart {
    let mut lines: Vec<&CartLine> = input.lines.iter().collect();
    lines.sort_by(|a, b| {
        a.added_at
            .cmp(&b.added_at)
            .then(a.product_id.cmp(&b.product_id))
    });

    let mut priced = Vec::with_capacity(lines.len());
    let mut vendors: BTreeMap<Uuid, VendorSubtotal> = BTreeMap::new();
    let mut subtotal = Decimal::ZERO;
    let mut campaign_savings = Decimal::ZERO;
    let mut priced_lines = 0usize;

    for line in lines {
        let product = input.catalog.get(&line.product_id);
        let stock_status = StockStatus::assess(product, line.quantity);
        let quantity = Decimal::from(line.quantity);

        let (list_price, effective, campaign, line_total) = match product {
            Some(product) => {
                let list_price = money::cents(product.list_price());
                let resolved = discount::campaign_price(
                    list_price,
                    line.product_id,
                    input.campaigns,
                    input.now,
                );
                let line_total = money::cents(resolved.unit_price * quantity);
                subtotal += line_total;
                campaign_savings += (list_price - resolved.unit_price) * quantity;
                priced_lines += 1;
                (
                    Some(list_price),
                    Some(resolved.unit_price),
                    resolved.campaign,
                    line_total,
                )
            }
            None => (None, None, None, money::cents(Decimal::ZERO)),
        };

        let vendor_id = product.map(|p| p.vendor_id).unwrap_or(line.vendor_id);
        let group = vendors.entry(vendor_id).or_insert_with(|| VendorSubtotal {
            vendor_id,
            item_count: 0,
            subtotal: money::cents(Decimal::ZERO),
        });
        group.item_count += i64::from(line.quantity);
        group.subtotal = money::cents(group.subtotal + line_total);

        priced.push(PricedLine {
            product_id: line.product_id,
            vendor_id,
            name: product.map(|p| p.name.clone()),
            image_url: product.and_then(|p| p.image_url.clone()),
            quantity: line.quantity,
            attributes: line.attributes.clone(),
            unit_price_snapshot: money::cents(line.unit_price_snapshot),
            list_price,
            effective_unit_price: effective,
            line_total,
            campaign,
            price_changed: list_price.is_some_and(|p| p != line.unit_price_snapshot),
            stock_status,
            added_at: line.added_at,
        });
    }

    let subtotal = money::cents(subtotal);
    let (coupon, discount) = match input.coupon {
        Some(coupon) => {
            let verdict = discount::check_coupon(coupon, subtotal, input.now);
            let discount = if verdict.is_ok() {
                discount::coupon_discount(coupon, subtotal)
            } else {
                money::cents(Decimal::ZERO)
            };
            (
                Some(CartCoupon {
                    code: coupon.code.clone(),
                    discount_kind: coupon.discount_kind,
                    discount_value: coupon.discount_value,
                    eligible: verdict.is_ok(),
                    reason: verdict.err().map(|e| e.to_string()),
                }),
                discount,
            )
        }
        None => (None, money::cents(Decimal::ZERO)),
    };

    let shipping = if priced_lines == 0 {
        money::cents(Decimal::ZERO)
    } else {
        input.policy.shipping_for(subtotal)
    };
    let tax = money::cents(input.tax.unwrap_or(Decimal::ZERO));
    let total = money::cents(subtotal - discount + shipping + tax);

    PricedCart {
        item_count: priced.iter().map(|l| i64::from(l.quantity)).sum(),
        lines: priced,
        vendors: vendors.into_values().collect(),
        coupon,
        totals: CartTotals {
            subtotal,
            discount,
            campaign_savings: money::cents(campaign_savings),
            shipping,
            tax,
            total,
        },
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::CampaignStatus;

    fn dollars(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    fn product(price_cents: i64, stock: i32) -> CatalogProduct {
        CatalogProduct {
            id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            name: "Widget".into(),
            image_url: Some("widget.png".into()),
            price: dollars(price_cents),
            sale_price: None,
            stock,
        }
    }

    fn line_for(product: &CatalogProduct, quantity: i32) -> CartLine {
        CartLine {
            product_id: product.id,
            vendor_id: product.vendor_id,
            quantity,
            unit_price_snapshot: product.list_price(),
            attributes: LineAttributes::new(),
            added_at: Utc::now(),
        }
    }

    fn percent_campaign(product_id: Uuid, pct: i64, now: DateTime<Utc>) -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            name: "Flash sale".into(),
            status: CampaignStatus::Active,
            start_date: now - Duration::hours(1),
            end_date: now + Duration::days(1),
            discount_kind: DiscountKind::Percentage,
            discount_value: Decimal::from(pct),
            product_ids: vec![product_id],
        }
    }

    fn catalog_of(products: &[&CatalogProduct]) -> HashMap<Uuid, CatalogProduct> {
        products.iter().map(|p| (p.id, (*p).clone())).collect()
    }

    fn price(
        lines: &[CartLine],
        catalog: &HashMap<Uuid, CatalogProduct>,
        campaigns: &[Campaign],
        coupon: Option<&Coupon>,
        now: DateTime<Utc>,
    ) -> PricedCart {
        price_cart(PricingInput {
            lines,
            catalog,
            campaigns,
            coupon,
            tax: None,
            policy: &PricingPolicy::default(),
            now,
        })
    }

    #[test]
    fn mixed_cart_below_free_shipping_threshold() {
        let now = Utc::now();
        let a = product(1000, 10);
        let b = product(3000, 10);
        let campaigns = [percent_campaign(b.id, 10, now)];
        let lines = [line_for(&a, 2), line_for(&b, 1)];

        let cart = price(&lines, &catalog_of(&[&a, &b]), &campaigns, None, now);

        assert_eq!(cart.totals.subtotal, dollars(4700));
        assert_eq!(cart.totals.shipping, dollars(599));
        assert_eq!(cart.totals.discount, Decimal::ZERO);
        assert_eq!(cart.totals.campaign_savings, dollars(300));
        assert_eq!(cart.totals.total, dollars(5299));
        assert_eq!(cart.item_count, 3);
        assert_eq!(cart.vendors.len(), 2);
    }

    #[test]
    fn item_counts_do_not_overflow_at_the_stock_ceiling() {
        let now = Utc::now();
        let a = product(1, i32::MAX);
        let mut b = product(1, i32::MAX);
        b.vendor_id = a.vendor_id;
        let lines = [line_for(&a, i32::MAX), line_for(&b, i32::MAX)];

        let cart = price(&lines, &catalog_of(&[&a, &b]), &[], None, now);

        let expected = 2 * i64::from(i32::MAX);
        assert_eq!(cart.item_count, expected);
        assert_eq!(cart.vendors.len(), 1);
        assert_eq!(cart.vendors[0].item_count, expected);
    }

    #[test]
    fn coupon_stacks_on_campaign_price() {
        let now = Utc::now();
        let p = product(2000, 5);
        let campaigns = [percent_campaign(p.id, 25, now)];
        let coupon = Coupon {
            code: "TENOFF".into(),
            discount_kind: DiscountKind::Percentage,
            discount_value: Decimal::from(10),
            min_subtotal: None,
            expires_at: None,
            usage_limit: None,
            times_used: 0,
        };

        let cart = price(&[line_for(&p, 1)], &catalog_of(&[&p]), &campaigns, Some(&coupon), now);

        assert_eq!(cart.lines[0].effective_unit_price, Some(dollars(1500)));
        assert_eq!(cart.totals.subtotal, dollars(1500));
        assert_eq!(cart.totals.discount, dollars(150));
        assert_eq!(cart.totals.total, dollars(1500 - 150 + 599));
        assert!(cart.coupon.as_ref().is_some_and(|c| c.eligible));
    }

    #[test]
    fn free_shipping_starts_exactly_at_threshold() {
        let now = Utc::now();
        let below = product(4999, 5);
        let at = product(5000, 5);

        let cart = price(&[line_for(&below, 1)], &catalog_of(&[&below]), &[], None, now);
        assert_eq!(cart.totals.shipping, dollars(599));

        let cart = price(&[line_for(&at, 1)], &catalog_of(&[&at]), &[], None, now);
        assert_eq!(cart.totals.shipping, Decimal::ZERO);
    }

    #[test]
    fn pricing_is_repeatable() {
        let now = Utc::now();
        let a = product(1299, 4);
        let b = product(799, 4);
        let campaigns = [percent_campaign(a.id, 15, now)];
        let lines = [line_for(&a, 3), line_for(&b, 2)];
        let catalog = catalog_of(&[&a, &b]);

        let first = price(&lines, &catalog, &campaigns, None, now);
        let second = price(&lines, &catalog, &campaigns, None, now);

        assert_eq!(first, second);
    }

    #[test]
    fn flags_stock_problems_without_dropping_lines() {
        let now = Utc::now();
        let short = product(1000, 1);
        let gone = product(1000, 0);
        let vanished = product(2500, 3);
        let lines = [line_for(&short, 2), line_for(&gone, 1), line_for(&vanished, 1)];

        let cart = price(&lines, &catalog_of(&[&short, &gone]), &[], None, now);

        assert_eq!(cart.lines.len(), 3);
        assert_eq!(
            cart.line(short.id).map(|l| l.stock_status),
            Some(StockStatus::Insufficient { available: 1 })
        );
        assert_eq!(
            cart.line(gone.id).map(|l| l.stock_status),
            Some(StockStatus::OutOfStock)
        );
        assert_eq!(
            cart.line(vanished.id).map(|l| l.stock_status),
            Some(StockStatus::Unavailable)
        );
        // the vanished product cannot be priced
        assert_eq!(cart.totals.subtotal, dollars(3000));
    }

    #[test]
    fn ineligible_coupon_is_reported_but_grants_nothing() {
        let now = Utc::now();
        let p = product(2000, 5);
        let coupon = Coupon {
            code: "BIGSPEND".into(),
            discount_kind: DiscountKind::Fixed,
            discount_value: dollars(1000),
            min_subtotal: Some(dollars(10000)),
            expires_at: None,
            usage_limit: None,
            times_used: 0,
        };

        let cart = price(&[line_for(&p, 1)], &catalog_of(&[&p]), &[], Some(&coupon), now);

        let attached = cart.coupon.expect("coupon stays attached");
        assert!(!attached.eligible);
        assert!(attached.reason.is_some());
        assert_eq!(cart.totals.discount, Decimal::ZERO);
    }

    #[test]
    fn empty_cart_costs_nothing() {
        let cart = price(&[], &HashMap::new(), &[], None, Utc::now());
        assert!(cart.is_empty());
        assert_eq!(cart.totals.shipping, Decimal::ZERO);
        assert_eq!(cart.totals.total, Decimal::ZERO);
    }

    #[test]
    fn price_changes_since_add_are_flagged() {
        let now = Utc::now();
        let mut p = product(2000, 5);
        let line = line_for(&p, 1);
        p.sale_price = Some(dollars(1800));

        let cart = price(&[line], &catalog_of(&[&p]), &[], None, now);

        assert!(cart.lines[0].price_changed);
        assert_eq!(cart.totals.subtotal, dollars(1800));
    }
}
