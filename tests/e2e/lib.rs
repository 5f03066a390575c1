//! End-to-end scenarios against a real local Redis instance and a mock
//! webhook receiver, covering the testable properties named by the
//! event-notification pipeline. Requires `REDIS_URL` (default
//! `redis://127.0.0.1:6379`) to point at a reachable, disposable Redis.

#[cfg(all(test, feature = "e2e-tests"))]
mod test {
    use std::sync::Arc;
    use std::time::Duration;

    use gateway_core::delivery::{DeliveryConfig, PrimaryWorkerPool, DLQ_STREAM_KEY};
    use gateway_core::emitter::Emitter;
    use gateway_core::log::{DurableEventLog, RedisEventLog};
    use gateway_core::metrics::DeliveryMetrics;
    use gateway_core::model::{FilterTriple, ResourceEvent, Subscription};
    use gateway_core::store::{RedisSubscriptionStore, SubscriptionStore};
    use gateway_core::watch::fake::FakeWatchSource;
    use gateway_core::watch::WatchSource;
    use redis::aio::ConnectionManager;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_owned())
    }

    async fn connection() -> ConnectionManager {
        let client = redis::Client::open(redis_url()).expect("valid redis url");
        ConnectionManager::new(client)
            .await
            .expect("redis reachable for e2e tests")
    }

    async fn fresh_sub_store(conn: ConnectionManager) -> RedisSubscriptionStore {
        RedisSubscriptionStore::new(conn, true, 1_000)
    }

    fn new_sub(id: &str, callback_url: &str, filter: FilterTriple) -> Subscription {
        Subscription {
            id: id.to_owned(),
            tenant_id: None,
            callback_url: callback_url.to_owned(),
            consumer_subscription_id: None,
            filter,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    /// S1 — a Node creation event, with one matching subscription, produces
    /// exactly one log entry and exactly one correctly-shaped webhook POST.
    #[tokio::test]
    async fn node_created_fans_out_to_matching_subscription() {
        let stream_key = "e2e:s1:events";
        let conn = connection().await;
        let _: () = redis::cmd("DEL")
            .arg(stream_key)
            .query_async(&mut conn.clone())
            .await
            .unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sub_store = fresh_sub_store(conn.clone()).await;
        let _ = sub_store.delete("sub-123").await;
        sub_store
            .create(new_sub(
                "sub-123",
                &format!("{}/notify", server.uri()),
                FilterTriple {
                    resource_pool_id: Some("test-pool".into()),
                    resource_type_id: Some("k8s-node".into()),
                    resource_id: None,
                },
            ))
            .await
            .unwrap();

        let log: Arc<dyn DurableEventLog> = Arc::new(RedisEventLog::new(conn.clone(), stream_key));
        let emitter = Emitter::spawn(log.clone(), 10_000);
        let seed = vec![gateway_core::watch::WatchedObject::node(
            "test-node-1",
            "v1",
            Some("test-pool"),
        )];
        let watch_source = Arc::new(FakeWatchSource::new(seed));
        let handler = emitter.clone();
        let watch_task = tokio::spawn(async move {
            watch_source
                .run(handler, Duration::from_secs(3600), Duration::from_secs(5))
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let metrics = Arc::new(DeliveryMetrics::default());
        let pool = PrimaryWorkerPool::spawn(
            log.clone(),
            Arc::new(sub_store),
            metrics,
            reqwest::Client::new(),
            DeliveryConfig {
                worker_count: 1,
                delivery_timeout: Duration::from_secs(5),
                max_retries: 1,
                retry_backoff: Duration::from_millis(50),
                max_backoff: Duration::from_secs(1),
                hmac_secret: None,
                max_stream_length: 10_000,
            },
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body: ResourceEvent = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body.notification_event_type, "o2ims.Resource.Created");
        assert_eq!(body.object_ref, "/o2ims/v1/resources/test-node-1");
        assert_eq!(body.resource_type_id, "k8s-node");
        assert_eq!(body.resource_pool_id.as_deref(), Some("test-pool"));
        assert_eq!(body.global_resource_id, "test-node-1");
        assert_eq!(body.subscription_id, "sub-123");

        pool.shutdown().await;
        watch_task.abort();
    }

    /// S4 — the webhook returns 500, 500, 200 on three successive attempts;
    /// delivery ultimately succeeds and no DLQ entry appears.
    #[tokio::test]
    async fn retry_then_succeed_produces_no_dlq_entry() {
        let stream_key = "e2e:s4:events";
        let conn = connection().await;
        let _: () = redis::cmd("DEL")
            .arg(stream_key)
            .arg(DLQ_STREAM_KEY)
            .query_async(&mut conn.clone())
            .await
            .unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sub_store = fresh_sub_store(conn.clone()).await;
        let _ = sub_store.delete("sub-s4").await;
        sub_store
            .create(new_sub("sub-s4", &format!("{}/notify", server.uri()), FilterTriple::default()))
            .await
            .unwrap();

        let log: Arc<dyn DurableEventLog> = Arc::new(RedisEventLog::new(conn.clone(), stream_key));
        let payload = serde_json::to_string(&sample_event("sub-s4")).unwrap();
        log.append(&[("event", payload.as_str())], 10_000)
            .await
            .unwrap();

        let metrics = Arc::new(DeliveryMetrics::default());
        let pool = PrimaryWorkerPool::spawn(
            log.clone(),
            Arc::new(sub_store),
            metrics,
            reqwest::Client::new(),
            DeliveryConfig {
                worker_count: 1,
                delivery_timeout: Duration::from_secs(5),
                max_retries: 3,
                retry_backoff: Duration::from_millis(100),
                max_backoff: Duration::from_secs(5),
                hmac_secret: None,
                max_stream_length: 10_000,
            },
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);

        let dlq_len: u64 = redis::cmd("XLEN")
            .arg(DLQ_STREAM_KEY)
            .query_async(&mut conn.clone())
            .await
            .unwrap();
        assert_eq!(dlq_len, 0);

        pool.shutdown().await;
    }

    /// S5 — the webhook always fails; after exhausting retries the event
    /// lands in the DLQ with the required fields.
    #[tokio::test]
    async fn retry_exhaustion_routes_to_dlq() {
        let stream_key = "e2e:s5:events";
        let conn = connection().await;
        let _: () = redis::cmd("DEL")
            .arg(stream_key)
            .arg(DLQ_STREAM_KEY)
            .query_async(&mut conn.clone())
            .await
            .unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sub_store = fresh_sub_store(conn.clone()).await;
        let _ = sub_store.delete("sub-s5").await;
        sub_store
            .create(new_sub("sub-s5", &format!("{}/notify", server.uri()), FilterTriple::default()))
            .await
            .unwrap();

        let log: Arc<dyn DurableEventLog> = Arc::new(RedisEventLog::new(conn.clone(), stream_key));
        let payload = serde_json::to_string(&sample_event("sub-s5")).unwrap();
        log.append(&[("event", payload.as_str())], 10_000)
            .await
            .unwrap();

        let metrics = Arc::new(DeliveryMetrics::default());
        let pool = PrimaryWorkerPool::spawn(
            log.clone(),
            Arc::new(sub_store),
            metrics,
            reqwest::Client::new(),
            DeliveryConfig {
                worker_count: 1,
                delivery_timeout: Duration::from_secs(5),
                max_retries: 2,
                retry_backoff: Duration::from_millis(50),
                max_backoff: Duration::from_secs(1),
                hmac_secret: None,
                max_stream_length: 10_000,
            },
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);

        let dlq_log = RedisEventLog::new(conn.clone(), DLQ_STREAM_KEY);
        dlq_log.ensure_group("dlq-inspector").await.unwrap();
        let entry = dlq_log
            .read_group("dlq-inspector", "inspector-1", Duration::from_secs(5))
            .await
            .unwrap()
            .expect("a DLQ entry was written");
        assert!(entry.field("event").is_some());
        assert!(entry.field("original_id").is_some());
        assert!(entry.field("failed_at").is_some());
        assert_eq!(entry.field("subscription_id"), Some("sub-s5"));

        pool.shutdown().await;
    }

    /// S6 — a configured HMAC secret produces a signature header computed
    /// over the exact bytes delivered.
    #[tokio::test]
    async fn hmac_secret_signs_delivered_body() {
        let stream_key = "e2e:s6:events";
        let conn = connection().await;
        let _: () = redis::cmd("DEL")
            .arg(stream_key)
            .query_async(&mut conn.clone())
            .await
            .unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sub_store = fresh_sub_store(conn.clone()).await;
        let _ = sub_store.delete("sub-s6").await;
        sub_store
            .create(new_sub("sub-s6", &format!("{}/notify", server.uri()), FilterTriple::default()))
            .await
            .unwrap();

        let log: Arc<dyn DurableEventLog> = Arc::new(RedisEventLog::new(conn.clone(), stream_key));
        let payload = serde_json::to_string(&sample_event("sub-s6")).unwrap();
        log.append(&[("event", payload.as_str())], 10_000)
            .await
            .unwrap();

        let metrics = Arc::new(DeliveryMetrics::default());
        let pool = PrimaryWorkerPool::spawn(
            log.clone(),
            Arc::new(sub_store),
            metrics,
            reqwest::Client::new(),
            DeliveryConfig {
                worker_count: 1,
                delivery_timeout: Duration::from_secs(5),
                max_retries: 1,
                retry_backoff: Duration::from_millis(50),
                max_backoff: Duration::from_secs(1),
                hmac_secret: Some(b"test-secret-key".to_vec()),
                max_stream_length: 10_000,
            },
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let expected = gateway_http_util_signature(&requests[0].body);
        let actual = requests[0]
            .headers
            .get("x-o2ims-signature")
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(actual, expected);

        pool.shutdown().await;
    }

    /// S7 — a spurious update (unchanged version token) produces zero log
    /// entries.
    #[tokio::test]
    async fn spurious_update_appends_nothing() {
        let stream_key = "e2e:s7:events";
        let conn = connection().await;
        let _: () = redis::cmd("DEL")
            .arg(stream_key)
            .query_async(&mut conn.clone())
            .await
            .unwrap();

        let log: Arc<dyn DurableEventLog> = Arc::new(RedisEventLog::new(conn.clone(), stream_key));
        let emitter = Emitter::spawn(log.clone(), 10_000);
        let initial = vec![gateway_core::watch::WatchedObject::node("node-1", "v1", None)];
        let watch_source = Arc::new(FakeWatchSource::new(initial));
        let handler = emitter.clone();
        let source_clone = watch_source.clone();
        let watch_task = tokio::spawn(async move {
            source_clone
                .run(handler, Duration::from_secs(3600), Duration::from_secs(5))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        watch_source.upsert(gateway_core::watch::WatchedObject::node("node-1", "v1", None));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let len: u64 = redis::cmd("XLEN")
            .arg(stream_key)
            .query_async(&mut conn.clone())
            .await
            .unwrap();
        assert_eq!(len, 1); // only the initial-sync add, no update entry

        watch_task.abort();
    }

    /// `update` re-indexes across pool sets and preserves `created_at` while
    /// advancing `updated_at` (spec §8 invariants 1 and 2).
    #[tokio::test]
    async fn update_reindexes_pool_membership_and_preserves_created_at() {
        let conn = connection().await;
        let sub_store = fresh_sub_store(conn.clone()).await;
        let _ = sub_store.delete("sub-update").await;
        let _: () = redis::cmd("DEL")
            .arg("subscriptions:pool:pool-a")
            .arg("subscriptions:pool:pool-b")
            .query_async(&mut conn.clone())
            .await
            .unwrap();

        let created = sub_store
            .create(new_sub(
                "sub-update",
                "http://example.com/notify",
                FilterTriple {
                    resource_pool_id: Some("pool-a".into()),
                    resource_type_id: None,
                    resource_id: None,
                },
            ))
            .await
            .unwrap();

        let pool_a_members: Vec<String> = redis::cmd("SMEMBERS")
            .arg("subscriptions:pool:pool-a")
            .query_async(&mut conn.clone())
            .await
            .unwrap();
        assert!(pool_a_members.contains(&"sub-update".to_owned()));

        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut updated_sub = created.clone();
        updated_sub.filter.resource_pool_id = Some("pool-b".into());
        let updated = sub_store.update(updated_sub).await.unwrap();

        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at > created.updated_at);

        let pool_a_members: Vec<String> = redis::cmd("SMEMBERS")
            .arg("subscriptions:pool:pool-a")
            .query_async(&mut conn.clone())
            .await
            .unwrap();
        assert!(!pool_a_members.contains(&"sub-update".to_owned()));
        let pool_b_members: Vec<String> = redis::cmd("SMEMBERS")
            .arg("subscriptions:pool:pool-b")
            .query_async(&mut conn.clone())
            .await
            .unwrap();
        assert!(pool_b_members.contains(&"sub-update".to_owned()));

        sub_store.delete("sub-update").await.unwrap();
    }

    /// A create that would push a tenant past `tenant_subscription_quota`
    /// fails with `QuotaExceeded` and leaves the ceiling-th subscription
    /// unwritten (spec §4.7).
    #[tokio::test]
    async fn create_past_tenant_quota_fails() {
        let conn = connection().await;
        let tenant = "tenant-quota-e2e";
        let quota = 2u64;
        let sub_store = RedisSubscriptionStore::new(conn.clone(), true, quota);

        let ids = ["sub-quota-1", "sub-quota-2", "sub-quota-3"];
        for id in ids {
            let _ = sub_store.delete(id).await;
        }

        for id in &ids[..quota as usize] {
            let mut sub = new_sub(id, "http://example.com/notify", FilterTriple::default());
            sub.tenant_id = Some(tenant.to_owned());
            sub_store.create(sub).await.unwrap();
        }

        let mut over_quota = new_sub(ids[2], "http://example.com/notify", FilterTriple::default());
        over_quota.tenant_id = Some(tenant.to_owned());
        let err = sub_store.create(over_quota).await.unwrap_err();
        match err {
            gateway_core::error::Error::QuotaExceeded { tenant: t, ceiling } => {
                assert_eq!(t, tenant);
                assert_eq!(ceiling, quota);
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
        assert!(matches!(sub_store.get(ids[2]).await, Err(gateway_core::error::Error::NotFound)));

        for id in ids {
            let _ = sub_store.delete(id).await;
        }
    }

    fn sample_event(subscription_id: &str) -> ResourceEvent {
        ResourceEvent {
            subscription_id: subscription_id.to_owned(),
            notification_event_type: "o2ims.Resource.Created".into(),
            object_ref: "/o2ims/v1/resources/test-node-1".into(),
            resource_type_id: "k8s-node".into(),
            resource_pool_id: Some("test-pool".into()),
            global_resource_id: "test-node-1".into(),
            timestamp: chrono::Utc::now(),
            notification_id: "notif-1".into(),
            callback_url: String::new(),
        }
    }

    fn gateway_http_util_signature(body: &[u8]) -> String {
        gateway_http_util::sign_body(b"test-secret-key", body)
    }
}
