use std::sync::Arc;

use crate::{
    audit::{DynAuditTrail, PgAuditTrail},
    catalog::DynInventoryOracle,
    config::{AppConfig, StoreBackend},
    db::{DbPool, create_pool, orm_from_pool, run_migrations},
    services::pricing::PricingPolicy,
    store::{
        DynCartRepository, DynOrderRepository, DynPromotionRepository, memory::MemoryStore,
        postgres::PgStore,
    },
};

/// Everything a request needs, injected explicitly.
#[derive(Clone)]
pub struct AppState {
    pub catalog: DynInventoryOracle,
    pub carts: DynCartRepository,
    pub promotions: DynPromotionRepository,
    pub orders: DynOrderRepository,
    pub audit: DynAuditTrail,
    pub pricing: PricingPolicy,
    pub jwt_secret: Option<Arc<str>>,
}

impl AppState {
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let state = match config.backend {
            StoreBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is not set"))?;
                let pool = create_pool(url).await?;
                run_migrations(&pool).await?;
                Self::postgres(pool, config.pricing)
            }
            StoreBackend::Memory => {
                tracing::warn!("using the in-memory store; data is lost on restart");
                Self::in_memory(MemoryStore::new(), config.pricing)
            }
        };

        Ok(state.with_jwt_secret(config.jwt_secret.as_deref()))
    }

    pub fn postgres(pool: DbPool, pricing: PricingPolicy) -> Self {
        let store = Arc::new(PgStore::new(pool.clone(), orm_from_pool(&pool)));
        Self {
            catalog: store.clone(),
            carts: store.clone(),
            promotions: store.clone(),
            orders: store,
            audit: Arc::new(PgAuditTrail::new(pool)),
            pricing,
            jwt_secret: None,
        }
    }

    pub fn in_memory(store: MemoryStore, pricing: PricingPolicy) -> Self {
        let store = Arc::new(store);
        Self {
            catalog: store.clone(),
            carts: store.clone(),
            promotions: store.clone(),
            orders: store.clone(),
            audit: store,
            pricing,
            jwt_secret: None,
        }
    }

    pub fn with_jwt_secret(mut self, secret: Option<&str>) -> Self {
        self.jwt_secret = secret.map(Arc::from);
        self
    }
}
