//! Read access to the live product catalog.
//!
//! The engine never caches catalog data between calls: price, stock and vendor
//! ownership are looked up fresh for every cart read, mutation and checkout.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppResult;

pub type DynInventoryOracle = Arc<dyn InventoryOracle + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CatalogProduct {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub name: String,
    pub image_url: Option<String>,
    #[schema(value_type = String)]
    pub price: Decimal,
    #[schema(value_type = Option<String>)]
    pub sale_price: Option<Decimal>,
    pub stock: i32,
}

impl CatalogProduct {
    /// The vendor's own asking price: the sale price when it undercuts the
    /// regular price. Campaign discounts are applied on top of this.
    pub fn list_price(&self) -> Decimal {
        match self.sale_price {
            Some(sale) if sale < self.price => sale,
            _ => self.price,
        }
    }
}

#[async_trait]
pub trait InventoryOracle {
    async fn lookup(&self, product_id: Uuid) -> AppResult<Option<CatalogProduct>>;

    async fn lookup_many(&self, product_ids: &[Uuid]) -> AppResult<HashMap<Uuid, CatalogProduct>> {
        let mut found = HashMap::with_capacity(product_ids.len());
        for id in product_ids {
            if let Some(product) = self.lookup(*id).await? {
                found.insert(*id, product);
            }
        }
        Ok(found)
    }
}
