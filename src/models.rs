use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Whoever owns a cart: a signed-in user or an anonymous session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shopper {
    User(Uuid),
    Guest(String),
}

impl Shopper {
    /// Storage key for the shopper's cart and guest orders.
    pub fn key(&self) -> String {
        match self {
            Shopper::User(id) => format!("user:{id}"),
            Shopper::Guest(token) => format!("guest:{token}"),
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Shopper::User(id) => Some(*id),
            Shopper::Guest(_) => None,
        }
    }
}

impl fmt::Display for Shopper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Free-form line options such as size or colour.
pub type LineAttributes = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub product_id: Uuid,
    pub vendor_id: Uuid,
    pub quantity: i32,
    /// List price when the line was first added. Display only.
    #[schema(value_type = String)]
    pub unit_price_snapshot: Decimal,
    pub attributes: LineAttributes,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    Percentage,
    Fixed,
}

impl DiscountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountKind::Percentage => "percentage",
            DiscountKind::Fixed => "fixed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "percentage" => Some(DiscountKind::Percentage),
            "fixed" => Some(DiscountKind::Fixed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Inactive,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(CampaignStatus::Active),
            "inactive" => Some(CampaignStatus::Inactive),
            _ => None,
        }
    }
}

/// A time-boxed promotion on a set of products.
#[derive(Debug, Clone, PartialEq)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    pub start_date: DateTime<Utc>,
    /// Exclusive.
    pub end_date: DateTime<Utc>,
    pub discount_kind: DiscountKind,
    pub discount_value: Decimal,
    pub product_ids: Vec<Uuid>,
}

impl Campaign {
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.status == CampaignStatus::Active && self.start_date <= now && now < self.end_date
    }

    pub fn covers(&self, product_id: Uuid) -> bool {
        self.product_ids.contains(&product_id)
    }
}

/// A cart-level discount code. `code` is stored upper-cased.
#[derive(Debug, Clone, PartialEq)]
pub struct Coupon {
    pub code: String,
    pub discount_kind: DiscountKind,
    pub discount_value: Decimal,
    pub min_subtotal: Option<Decimal>,
    pub expires_at: Option<DateTime<Utc>>,
    pub usage_limit: Option<i32>,
    pub times_used: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(OrderStatus::Pending),
            "processing" => Some(OrderStatus::Processing),
            "shipped" => Some(OrderStatus::Shipped),
            "completed" => Some(OrderStatus::Completed),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// `pending -> processing -> shipped -> completed`, and `cancelled` from
    /// either of the first two.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Shipped)
                | (Shipped, Completed)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ShippingAddress {
    pub recipient_name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub region: Option<String>,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Option<Uuid>,
    pub shipping_address: ShippingAddress,
    pub payment_method: String,
    pub coupon_code: Option<String>,
    #[schema(value_type = String)]
    pub subtotal: Decimal,
    #[schema(value_type = String)]
    pub discount: Decimal,
    #[schema(value_type = String)]
    pub shipping_cost: Decimal,
    #[schema(value_type = String)]
    pub tax: Decimal,
    #[schema(value_type = String)]
    pub total: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub vendor_id: Uuid,
    pub product_name: String,
    pub product_image: Option<String>,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub line_total: Decimal,
}
