//! Hub Store (spec §3, §4.6): persisted federation hub registrations.
//!
//! Simpler than the subscription store: a hub has no filter dimensions to
//! index by (matching is delegated to the federation path's query-expression
//! matcher) and no tenant scoping, so creation only needs an ID-uniqueness
//! check and update is not part of the lifecycle — hubs are immutable while
//! alive (spec §3).

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::{Error, Result};
use crate::model::HubRegistration;

const ACTIVE_SET: &str = "hubs:active";

fn hub_key(id: &str) -> String {
    format!("hub:{id}")
}

/// Contract a hub store must satisfy (spec §3, §4.6).
#[async_trait]
pub trait HubStore: Send + Sync {
    async fn create(&self, hub: HubRegistration) -> Result<HubRegistration>;
    async fn get(&self, id: &str) -> Result<HubRegistration>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<HubRegistration>>;
}

mod scripts {
    use redis::Script;

    /// KEYS: [hub_key, active_key]. ARGV: [id, json]. Returns "OK" /
    /// "ALREADY_EXISTS".
    pub fn create() -> Script {
        Script::new(
            r#"
            if redis.call('EXISTS', KEYS[1]) == 1 then
                return 'ALREADY_EXISTS'
            end
            redis.call('SET', KEYS[1], ARGV[2])
            redis.call('SADD', KEYS[2], ARGV[1])
            return 'OK'
            "#,
        )
    }

    /// KEYS: [hub_key, active_key]. ARGV: [id]. Returns "OK" / "NOT_FOUND".
    pub fn delete() -> Script {
        Script::new(
            r#"
            if redis.call('EXISTS', KEYS[1]) == 0 then
                return 'NOT_FOUND'
            end
            redis.call('DEL', KEYS[1])
            redis.call('SREM', KEYS[2], ARGV[1])
            return 'OK'
            "#,
        )
    }
}

/// Redis-backed [`HubStore`].
#[derive(Clone)]
pub struct RedisHubStore {
    conn: ConnectionManager,
}

impl RedisHubStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl HubStore for RedisHubStore {
    async fn create(&self, mut hub: HubRegistration) -> Result<HubRegistration> {
        if hub.id.is_empty() {
            return Err(Error::InvalidInput("id must not be empty".into()));
        }
        if hub.callback.is_empty() {
            return Err(Error::InvalidInput("callback must not be empty".into()));
        }
        hub.created_at = Utc::now();
        let json = serde_json::to_string(&hub)
            .map_err(|e| Error::InvalidInput(format!("hub not serializable: {e}")))?;

        let mut conn = self.conn.clone();
        let outcome: String = scripts::create()
            .key(hub_key(&hub.id))
            .key(ACTIVE_SET)
            .arg(&hub.id)
            .arg(&json)
            .invoke_async(&mut conn)
            .await
            .map_err(Error::from)?;

        match outcome.as_str() {
            "OK" => Ok(hub),
            "ALREADY_EXISTS" => Err(Error::AlreadyExists),
            other => Err(Error::Transient(format!("unexpected script reply: {other}"))),
        }
    }

    async fn get(&self, id: &str) -> Result<HubRegistration> {
        if id.is_empty() {
            return Err(Error::InvalidInput("id must not be empty".into()));
        }
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(hub_key(id)).await.map_err(Error::from)?;
        match value {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| Error::Transient(format!("corrupt hub record: {e}"))),
            None => Err(Error::NotFound),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::InvalidInput("id must not be empty".into()));
        }
        let mut conn = self.conn.clone();
        let outcome: String = scripts::delete()
            .key(hub_key(id))
            .key(ACTIVE_SET)
            .arg(id)
            .invoke_async(&mut conn)
            .await
            .map_err(Error::from)?;

        match outcome.as_str() {
            "OK" => Ok(()),
            "NOT_FOUND" => Err(Error::NotFound),
            other => Err(Error::Transient(format!("unexpected script reply: {other}"))),
        }
    }

    async fn list(&self) -> Result<Vec<HubRegistration>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(ACTIVE_SET).await.map_err(Error::from)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| hub_key(id)).collect();
        let values: Vec<Option<String>> = conn.mget(keys).await.map_err(Error::from)?;
        Ok(values
            .into_iter()
            .flatten()
            .filter_map(|v| serde_json::from_str(&v).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake::MemoryHubStore;

    #[test]
    fn hub_key_format() {
        assert_eq!(hub_key("hub-1"), "hub:hub-1");
    }

    fn sample_hub(id: &str) -> HubRegistration {
        HubRegistration {
            id: id.to_owned(),
            callback: "https://example.com/notify".to_owned(),
            query: None,
            subscription_id: None,
            extensions: Default::default(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let store = MemoryHubStore::new();
        store.create(sample_hub("hub-1")).await.unwrap();
        let err = store.create(sample_hub("hub-1")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists));
    }

    #[tokio::test]
    async fn delete_removes_from_list() {
        let store = MemoryHubStore::new();
        store.create(sample_hub("hub-1")).await.unwrap();
        store.delete("hub-1").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
