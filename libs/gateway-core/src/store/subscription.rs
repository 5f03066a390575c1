//! Subscription Store (spec §4.4): persisted subscriptions, indexed by
//! pool/type/tenant so the delivery worker never needs a full scan.
//!
//! The index layout matches spec §6 exactly: primary record at
//! `subscription:{id}`, membership set `subscriptions:active`, per-value sets
//! `subscriptions:{pool,type,tenant}:{key}`, change notifications published on
//! `subscriptions:events`. Multi-key mutations run as Redis Lua scripts
//! rather than `MULTI`/`EXEC`, because create/update need to branch on values
//! read inside the same atomic unit (quota ceiling, prior index membership) —
//! a bare pipeline can't express that. This assumes a single, non-clustered
//! Redis instance: the scripts build index key names by string
//! concatenation rather than declaring them in `KEYS`.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;
use url::Url;

use crate::error::{Error, Result};
use crate::model::Subscription;

const ACTIVE_SET: &str = "subscriptions:active";
const EVENTS_CHANNEL: &str = "subscriptions:events";

fn subscription_key(id: &str) -> String {
    format!("subscription:{id}")
}

fn pool_key(pool_id: &str) -> String {
    format!("subscriptions:pool:{pool_id}")
}

fn type_key(type_id: &str) -> String {
    format!("subscriptions:type:{type_id}")
}

fn tenant_key(tenant_id: &str) -> String {
    format!("subscriptions:tenant:{tenant_id}")
}

/// Validates a subscription callback URL per spec §4.4: scheme must be
/// http/https, host must be non-empty, and http is rejected unless
/// `allow_insecure` is set. Error messages name the failing rule.
pub fn validate_callback_url(url: &str, allow_insecure: bool) -> Result<()> {
    let parsed =
        Url::parse(url).map_err(|e| Error::InvalidInput(format!("callback_url: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::InvalidInput(format!(
                "callback_url: scheme '{other}' not in {{http, https}}"
            )))
        }
    }
    if parsed.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(Error::InvalidInput("callback_url: host is empty".into()));
    }
    if parsed.scheme() == "http" && !allow_insecure {
        return Err(Error::InvalidInput(
            "callback_url: scheme 'http' requires allow_insecure_callbacks".into(),
        ));
    }
    Ok(())
}

/// Contract a subscription store must satisfy (spec §4.4). Implementations
/// must treat every operation as safe under concurrent callers.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn create(&self, sub: Subscription) -> Result<Subscription>;
    async fn get(&self, id: &str) -> Result<Subscription>;
    async fn update(&self, sub: Subscription) -> Result<Subscription>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<Subscription>>;
    async fn list_by_pool(&self, pool_id: &str) -> Result<Vec<Subscription>>;
    async fn list_by_type(&self, type_id: &str) -> Result<Vec<Subscription>>;
    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<Subscription>>;
    async fn ping(&self) -> Result<()>;
}

mod scripts {
    use redis::Script;

    /// KEYS: [sub_key, active_key]. ARGV: [id, json, pool_id, type_id,
    /// tenant_id, quota_ceiling]. Returns "OK" / "ALREADY_EXISTS" /
    /// "QUOTA_EXCEEDED".
    pub fn create() -> Script {
        Script::new(
            r#"
            local sub_key = KEYS[1]
            local active_key = KEYS[2]
            local id = ARGV[1]
            local json = ARGV[2]
            local pool_id = ARGV[3]
            local type_id = ARGV[4]
            local tenant_id = ARGV[5]
            local quota_ceiling = tonumber(ARGV[6])

            if redis.call('EXISTS', sub_key) == 1 then
                return 'ALREADY_EXISTS'
            end

            if tenant_id ~= '' and quota_ceiling >= 0 then
                local count = redis.call('SCARD', 'subscriptions:tenant:' .. tenant_id)
                if count >= quota_ceiling then
                    return 'QUOTA_EXCEEDED'
                end
            end

            redis.call('SET', sub_key, json)
            redis.call('SADD', active_key, id)
            if pool_id ~= '' then redis.call('SADD', 'subscriptions:pool:' .. pool_id, id) end
            if type_id ~= '' then redis.call('SADD', 'subscriptions:type:' .. type_id, id) end
            if tenant_id ~= '' then redis.call('SADD', 'subscriptions:tenant:' .. tenant_id, id) end
            return 'OK'
            "#,
        )
    }

    /// KEYS: [sub_key]. ARGV: [json, pool_id, type_id, tenant_id]. Decodes
    /// the stored record to diff indices and to preserve `created_at`.
    /// Returns "OK" / "NOT_FOUND".
    pub fn update() -> Script {
        Script::new(
            r#"
            local sub_key = KEYS[1]
            local id = ARGV[1]
            local json = ARGV[2]
            local new_pool = ARGV[3]
            local new_type = ARGV[4]
            local new_tenant = ARGV[5]

            local existing = redis.call('GET', sub_key)
            if not existing then
                return 'NOT_FOUND'
            end

            local old = cjson.decode(existing)
            local old_pool = old.resource_pool_id or ''
            local old_type = old.resource_type_id or ''
            local old_tenant = old.tenant_id or ''

            if old_pool ~= new_pool then
                if old_pool ~= '' then redis.call('SREM', 'subscriptions:pool:' .. old_pool, id) end
                if new_pool ~= '' then redis.call('SADD', 'subscriptions:pool:' .. new_pool, id) end
            end
            if old_type ~= new_type then
                if old_type ~= '' then redis.call('SREM', 'subscriptions:type:' .. old_type, id) end
                if new_type ~= '' then redis.call('SADD', 'subscriptions:type:' .. new_type, id) end
            end
            if old_tenant ~= new_tenant then
                if old_tenant ~= '' then redis.call('SREM', 'subscriptions:tenant:' .. old_tenant, id) end
                if new_tenant ~= '' then redis.call('SADD', 'subscriptions:tenant:' .. new_tenant, id) end
            end

            local new_record = cjson.decode(json)
            new_record.created_at = old.created_at
            redis.call('SET', sub_key, cjson.encode(new_record))
            return 'OK'
            "#,
        )
    }

    /// KEYS: [sub_key, active_key]. ARGV: [id]. Returns "OK" / "NOT_FOUND".
    pub fn delete() -> Script {
        Script::new(
            r#"
            local sub_key = KEYS[1]
            local active_key = KEYS[2]
            local id = ARGV[1]

            local existing = redis.call('GET', sub_key)
            if not existing then
                return 'NOT_FOUND'
            end
            local old = cjson.decode(existing)
            local pool = old.resource_pool_id or ''
            local type_id = old.resource_type_id or ''
            local tenant = old.tenant_id or ''

            redis.call('DEL', sub_key)
            redis.call('SREM', active_key, id)
            if pool ~= '' then redis.call('SREM', 'subscriptions:pool:' .. pool, id) end
            if type_id ~= '' then redis.call('SREM', 'subscriptions:type:' .. type_id, id) end
            if tenant ~= '' then redis.call('SREM', 'subscriptions:tenant:' .. tenant, id) end
            return 'OK'
            "#,
        )
    }
}

/// Redis-backed [`SubscriptionStore`].
#[derive(Clone)]
pub struct RedisSubscriptionStore {
    conn: ConnectionManager,
    allow_insecure_callbacks: bool,
    tenant_quota: u64,
}

impl RedisSubscriptionStore {
    pub fn new(conn: ConnectionManager, allow_insecure_callbacks: bool, tenant_quota: u64) -> Self {
        Self {
            conn,
            allow_insecure_callbacks,
            tenant_quota,
        }
    }

    async fn hydrate(&self, ids: Vec<String>) -> Result<Vec<Subscription>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let keys: Vec<String> = ids.iter().map(|id| subscription_key(id)).collect();
        let values: Vec<Option<String>> = conn.mget(keys).await.map_err(Error::from)?;
        Ok(values
            .into_iter()
            .flatten()
            .filter_map(|v| serde_json::from_str(&v).ok())
            .collect())
    }

    async fn list_ids(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(key).await.map_err(Error::from)?;
        Ok(ids)
    }

    async fn notify(&self, event: &str, id: &str) {
        let mut conn = self.conn.clone();
        let payload = serde_json::json!({ "event": event, "id": id }).to_string();
        if let Err(e) = conn.publish::<_, _, ()>(EVENTS_CHANNEL, payload).await {
            warn!(msg = "subscription change notification publish failed", %e);
        }
    }
}

#[async_trait]
impl SubscriptionStore for RedisSubscriptionStore {
    async fn create(&self, mut sub: Subscription) -> Result<Subscription> {
        if sub.id.is_empty() {
            return Err(Error::InvalidInput("id must not be empty".into()));
        }
        validate_callback_url(&sub.callback_url, self.allow_insecure_callbacks)?;

        let now = Utc::now();
        sub.created_at = now;
        sub.updated_at = now;
        let json = serde_json::to_string(&sub)
            .map_err(|e| Error::InvalidInput(format!("subscription not serializable: {e}")))?;

        let mut conn = self.conn.clone();
        let outcome: String = scripts::create()
            .key(subscription_key(&sub.id))
            .key(ACTIVE_SET)
            .arg(&sub.id)
            .arg(&json)
            .arg(sub.filter.resource_pool_id.clone().unwrap_or_default())
            .arg(sub.filter.resource_type_id.clone().unwrap_or_default())
            .arg(sub.tenant_id.clone().unwrap_or_default())
            .arg(self.tenant_quota as i64)
            .invoke_async(&mut conn)
            .await
            .map_err(Error::from)?;

        match outcome.as_str() {
            "OK" => {
                self.notify("created", &sub.id).await;
                Ok(sub)
            }
            "ALREADY_EXISTS" => Err(Error::AlreadyExists),
            "QUOTA_EXCEEDED" => Err(Error::QuotaExceeded {
                tenant: sub.tenant_id.clone().unwrap_or_default(),
                ceiling: self.tenant_quota,
            }),
            other => Err(Error::Transient(format!("unexpected script reply: {other}"))),
        }
    }

    async fn get(&self, id: &str) -> Result<Subscription> {
        if id.is_empty() {
            return Err(Error::InvalidInput("id must not be empty".into()));
        }
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(subscription_key(id)).await.map_err(Error::from)?;
        match value {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| Error::Transient(format!("corrupt subscription record: {e}"))),
            None => Err(Error::NotFound),
        }
    }

    async fn update(&self, mut sub: Subscription) -> Result<Subscription> {
        if sub.id.is_empty() {
            return Err(Error::InvalidInput("id must not be empty".into()));
        }
        validate_callback_url(&sub.callback_url, self.allow_insecure_callbacks)?;

        sub.updated_at = Utc::now();
        let json = serde_json::to_string(&sub)
            .map_err(|e| Error::InvalidInput(format!("subscription not serializable: {e}")))?;

        let mut conn = self.conn.clone();
        let outcome: String = scripts::update()
            .key(subscription_key(&sub.id))
            .arg(&sub.id)
            .arg(&json)
            .arg(sub.filter.resource_pool_id.clone().unwrap_or_default())
            .arg(sub.filter.resource_type_id.clone().unwrap_or_default())
            .arg(sub.tenant_id.clone().unwrap_or_default())
            .invoke_async(&mut conn)
            .await
            .map_err(Error::from)?;

        match outcome.as_str() {
            "OK" => {
                self.notify("updated", &sub.id).await;
                self.get(&sub.id).await
            }
            "NOT_FOUND" => Err(Error::NotFound),
            other => Err(Error::Transient(format!("unexpected script reply: {other}"))),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::InvalidInput("id must not be empty".into()));
        }
        let mut conn = self.conn.clone();
        let outcome: String = scripts::delete()
            .key(subscription_key(id))
            .key(ACTIVE_SET)
            .arg(id)
            .invoke_async(&mut conn)
            .await
            .map_err(Error::from)?;

        match outcome.as_str() {
            "OK" => {
                self.notify("deleted", id).await;
                Ok(())
            }
            "NOT_FOUND" => Err(Error::NotFound),
            other => Err(Error::Transient(format!("unexpected script reply: {other}"))),
        }
    }

    async fn list(&self) -> Result<Vec<Subscription>> {
        let ids = self.list_ids(ACTIVE_SET).await?;
        self.hydrate(ids).await
    }

    async fn list_by_pool(&self, pool_id: &str) -> Result<Vec<Subscription>> {
        if pool_id.is_empty() {
            return Ok(Vec::new());
        }
        let ids = self.list_ids(&pool_key(pool_id)).await?;
        self.hydrate(ids).await
    }

    async fn list_by_type(&self, type_id: &str) -> Result<Vec<Subscription>> {
        if type_id.is_empty() {
            return Ok(Vec::new());
        }
        let ids = self.list_ids(&type_key(type_id)).await?;
        self.hydrate(ids).await
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<Subscription>> {
        if tenant_id.is_empty() {
            return Ok(Vec::new());
        }
        let ids = self.list_ids(&tenant_key(tenant_id)).await?;
        self.hydrate(ids).await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(Error::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fake::MemorySubscriptionStore;

    fn new_sub(id: &str, pool: Option<&str>, tenant: Option<&str>) -> Subscription {
        Subscription {
            id: id.to_owned(),
            tenant_id: tenant.map(str::to_owned),
            callback_url: "https://example.com/hook".to_owned(),
            consumer_subscription_id: None,
            filter: crate::model::FilterTriple {
                resource_pool_id: pool.map(str::to_owned),
                resource_type_id: None,
                resource_id: None,
            },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn list_by_pool_and_tenant_filter_to_matching_subscriptions() {
        let store = MemorySubscriptionStore::new();
        store.create(new_sub("sub-1", Some("pool-a"), Some("tenant-1"))).await.unwrap();
        store.create(new_sub("sub-2", Some("pool-b"), Some("tenant-1"))).await.unwrap();
        store.create(new_sub("sub-3", Some("pool-a"), Some("tenant-2"))).await.unwrap();

        let mut pool_a: Vec<String> = store.list_by_pool("pool-a").await.unwrap().into_iter().map(|s| s.id).collect();
        pool_a.sort();
        assert_eq!(pool_a, vec!["sub-1".to_owned(), "sub-3".to_owned()]);

        let tenant_1 = store.list_by_tenant("tenant-1").await.unwrap();
        assert_eq!(tenant_1.len(), 2);
        assert!(tenant_1.iter().all(|s| s.tenant_id.as_deref() == Some("tenant-1")));
    }

    #[tokio::test]
    async fn update_of_missing_subscription_is_not_found() {
        let store = MemorySubscriptionStore::new();
        let err = store.update(new_sub("sub-ghost", None, None)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[test]
    fn rejects_non_http_scheme() {
        let err = validate_callback_url("ftp://example.com/hook", false).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn rejects_empty_host() {
        let err = validate_callback_url("https:///hook", false).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn rejects_http_without_insecure_flag() {
        let err = validate_callback_url("http://example.com/hook", false).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn allows_http_with_insecure_flag() {
        assert!(validate_callback_url("http://example.com/hook", true).is_ok());
    }

    #[test]
    fn allows_https_always() {
        assert!(validate_callback_url("https://example.com/hook", false).is_ok());
    }
}
