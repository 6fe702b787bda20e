use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::{db::DbPool, error::AppResult, models::Shopper, state::AppState};

pub type DynAuditTrail = Arc<dyn AuditTrail + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub actor: String,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource: Option<String>,
    pub metadata: Option<Value>,
}

#[async_trait]
pub trait AuditTrail {
    async fn record(&self, entry: AuditEntry) -> AppResult<()>;
}

#[derive(Debug, Clone)]
pub struct PgAuditTrail {
    pool: DbPool,
}

impl PgAuditTrail {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditTrail for PgAuditTrail {
    async fn record(&self, entry: AuditEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, actor, user_id, action, resource, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.actor)
        .bind(entry.user_id)
        .bind(entry.action)
        .bind(entry.resource)
        .bind(entry.metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Best-effort: a failed audit write is logged and never fails the request.
pub async fn log_audit(
    state: &AppState,
    actor: &Shopper,
    action: &str,
    resource: Option<&str>,
    metadata: Option<Value>,
) {
    let entry = AuditEntry {
        actor: actor.key(),
        user_id: actor.user_id(),
        action: action.to_string(),
        resource: resource.map(str::to_string),
        metadata,
    };

    if let Err(err) = state.audit.record(entry).await {
        tracing::warn!(error = %err, action, "audit log failed");
    }
}
