//! Tenant & Quota Guard (spec §4.7): tenant scoping on top of the
//! subscription store, and an audit sink for mutating operations.
//!
//! Quota enforcement itself lives inside
//! [`crate::store::subscription::RedisSubscriptionStore::create`] (it has to
//! run in the same atomic unit as the index writes); this module adds the
//! request-level tenant boundary the store itself is agnostic to.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::{Error, Result};
use crate::model::Subscription;
use crate::store::SubscriptionStore;

/// One mutating-operation audit record (spec §4.7).
#[derive(Clone, Debug)]
pub struct AuditRecord {
    pub tenant_id: String,
    pub action: &'static str,
    pub resource_type: &'static str,
    pub resource_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Destination for audit records. The transport is named but not specified
/// by spec §1 ("external audit sink"); [`LoggingAuditSink`] is the minimal
/// concrete implementation needed to exercise the guard end-to-end.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

/// Emits audit records as structured log events.
pub struct LoggingAuditSink;

#[async_trait]
impl AuditSink for LoggingAuditSink {
    async fn record(&self, record: AuditRecord) {
        info!(
            target: "audit",
            tenant_id = %record.tenant_id,
            action = record.action,
            resource_type = record.resource_type,
            resource_id = %record.resource_id,
            timestamp = %record.timestamp,
            "subscription audit event"
        );
    }
}

/// Wraps a [`SubscriptionStore`] with tenant scoping and audit emission.
///
/// Cross-tenant reads return `NOT_FOUND`, never a distinct "forbidden" kind,
/// so a caller cannot distinguish "doesn't exist" from "belongs to another
/// tenant" (spec §4.7, §7).
pub struct TenantScopedSubscriptionStore<S> {
    inner: S,
    audit: Arc<dyn AuditSink>,
}

impl<S: SubscriptionStore> TenantScopedSubscriptionStore<S> {
    pub fn new(inner: S, audit: Arc<dyn AuditSink>) -> Self {
        Self { inner, audit }
    }

    fn owner(sub: &Subscription) -> &str {
        sub.tenant_id.as_deref().unwrap_or("")
    }

    fn in_scope(tenant: &str, sub: &Subscription) -> bool {
        Self::owner(sub) == tenant
    }

    pub async fn create(&self, tenant: &str, mut sub: Subscription) -> Result<Subscription> {
        sub.tenant_id = if tenant.is_empty() {
            None
        } else {
            Some(tenant.to_owned())
        };
        let created = self.inner.create(sub).await?;
        self.audit
            .record(AuditRecord {
                tenant_id: tenant.to_owned(),
                action: "create",
                resource_type: "subscription",
                resource_id: created.id.clone(),
                timestamp: Utc::now(),
            })
            .await;
        Ok(created)
    }

    pub async fn get(&self, tenant: &str, id: &str) -> Result<Subscription> {
        let sub = self.inner.get(id).await?;
        if Self::in_scope(tenant, &sub) {
            Ok(sub)
        } else {
            Err(Error::NotFound)
        }
    }

    pub async fn update(&self, tenant: &str, mut sub: Subscription) -> Result<Subscription> {
        let existing = self.inner.get(&sub.id).await?;
        if !Self::in_scope(tenant, &existing) {
            return Err(Error::NotFound);
        }
        sub.tenant_id = existing.tenant_id.clone();
        let updated = self.inner.update(sub).await?;
        self.audit
            .record(AuditRecord {
                tenant_id: tenant.to_owned(),
                action: "update",
                resource_type: "subscription",
                resource_id: updated.id.clone(),
                timestamp: Utc::now(),
            })
            .await;
        Ok(updated)
    }

    pub async fn delete(&self, tenant: &str, id: &str) -> Result<()> {
        let existing = self.inner.get(id).await?;
        if !Self::in_scope(tenant, &existing) {
            return Err(Error::NotFound);
        }
        self.inner.delete(id).await?;
        self.audit
            .record(AuditRecord {
                tenant_id: tenant.to_owned(),
                action: "delete",
                resource_type: "subscription",
                resource_id: id.to_owned(),
                timestamp: Utc::now(),
            })
            .await;
        Ok(())
    }

    pub async fn list(&self, tenant: &str) -> Result<Vec<Subscription>> {
        let all = self.inner.list().await?;
        Ok(all
            .into_iter()
            .filter(|s| Self::in_scope(tenant, s))
            .collect())
    }

    pub async fn list_by_pool(&self, tenant: &str, pool_id: &str) -> Result<Vec<Subscription>> {
        let matches = self.inner.list_by_pool(pool_id).await?;
        Ok(matches
            .into_iter()
            .filter(|s| Self::in_scope(tenant, s))
            .collect())
    }

    pub async fn list_by_type(&self, tenant: &str, type_id: &str) -> Result<Vec<Subscription>> {
        let matches = self.inner.list_by_type(type_id).await?;
        Ok(matches
            .into_iter()
            .filter(|s| Self::in_scope(tenant, s))
            .collect())
    }
}
