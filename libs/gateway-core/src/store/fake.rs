//! In-memory [`SubscriptionStore`]/[`HubStore`] test doubles, used across
//! this crate's unit tests in place of a real Redis connection (spec §1,
//! §9). Mirrors [`crate::watch::fake`]: no index sets, no Lua scripts, just
//! enough state to exercise callers of the trait.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Error, Result};
use crate::model::{HubRegistration, Subscription};
use crate::store::{HubStore, SubscriptionStore};

/// Backed by a single map keyed on subscription ID; `list_by_*` filter the
/// full set rather than maintaining secondary indices.
#[derive(Default)]
pub struct MemorySubscriptionStore {
    records: Mutex<HashMap<String, Subscription>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(initial: Vec<Subscription>) -> Self {
        let records = initial.into_iter().map(|s| (s.id.clone(), s)).collect();
        Self {
            records: Mutex::new(records),
        }
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn create(&self, mut sub: Subscription) -> Result<Subscription> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&sub.id) {
            return Err(Error::AlreadyExists);
        }
        let now = Utc::now();
        sub.created_at = now;
        sub.updated_at = now;
        records.insert(sub.id.clone(), sub.clone());
        Ok(sub)
    }

    async fn get(&self, id: &str) -> Result<Subscription> {
        self.records.lock().unwrap().get(id).cloned().ok_or(Error::NotFound)
    }

    async fn update(&self, mut sub: Subscription) -> Result<Subscription> {
        let mut records = self.records.lock().unwrap();
        let existing = records.get(&sub.id).ok_or(Error::NotFound)?;
        sub.created_at = existing.created_at;
        sub.updated_at = Utc::now();
        records.insert(sub.id.clone(), sub.clone());
        Ok(sub)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.records.lock().unwrap().remove(id).map(|_| ()).ok_or(Error::NotFound)
    }

    async fn list(&self) -> Result<Vec<Subscription>> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    async fn list_by_pool(&self, pool_id: &str) -> Result<Vec<Subscription>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.filter.resource_pool_id.as_deref() == Some(pool_id))
            .cloned()
            .collect())
    }

    async fn list_by_type(&self, type_id: &str) -> Result<Vec<Subscription>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.filter.resource_type_id.as_deref() == Some(type_id))
            .cloned()
            .collect())
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<Subscription>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.tenant_id.as_deref() == Some(tenant_id))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Backed by a single map keyed on hub ID.
#[derive(Default)]
pub struct MemoryHubStore {
    records: Mutex<HashMap<String, HubRegistration>>,
}

impl MemoryHubStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(initial: Vec<HubRegistration>) -> Self {
        let records = initial.into_iter().map(|h| (h.id.clone(), h)).collect();
        Self {
            records: Mutex::new(records),
        }
    }
}

#[async_trait]
impl HubStore for MemoryHubStore {
    async fn create(&self, mut hub: HubRegistration) -> Result<HubRegistration> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&hub.id) {
            return Err(Error::AlreadyExists);
        }
        hub.created_at = Utc::now();
        records.insert(hub.id.clone(), hub.clone());
        Ok(hub)
    }

    async fn get(&self, id: &str) -> Result<HubRegistration> {
        self.records.lock().unwrap().get(id).cloned().ok_or(Error::NotFound)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.records.lock().unwrap().remove(id).map(|_| ()).ok_or(Error::NotFound)
    }

    async fn list(&self) -> Result<Vec<HubRegistration>> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FilterTriple;

    fn new_sub(id: &str) -> Subscription {
        Subscription {
            id: id.to_owned(),
            tenant_id: None,
            callback_url: "https://example.com/hook".to_owned(),
            consumer_subscription_id: None,
            filter: FilterTriple::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let store = MemorySubscriptionStore::new();
        store.create(new_sub("sub-1")).await.unwrap();
        let err = store.create(new_sub("sub-1")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists));
    }

    #[tokio::test]
    async fn update_preserves_created_at() {
        let store = MemorySubscriptionStore::new();
        let created = store.create(new_sub("sub-1")).await.unwrap();
        let mut updated_sub = created.clone();
        updated_sub.consumer_subscription_id = Some("consumer-1".into());
        let updated = store.update(updated_sub).await.unwrap();
        assert_eq!(updated.created_at, created.created_at);
    }
}
