//! Event Emitter (spec §4.2): translates watch-source callbacks into
//! semantic [`ResourceEvent`]s and hands them to the durable log.
//!
//! Per spec §5, watch callbacks must be cheap and non-blocking; since a log
//! append is a network round trip, the [`ChangeHandler`] impl only builds the
//! event and enqueues it on an unbounded channel. A background task drains
//! the channel and performs the actual append, logging+metering failures
//! without blocking the watch dispatch task (spec §4.2: "Log-write failure
//! is logged and metered; the event is dropped").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::log::DurableEventLog;
use crate::model::{EventKind, ResourceEvent};
use crate::watch::{ChangeHandler, DeletedObject, ResourceKind, WatchedObject};

pub const PRIMARY_STREAM_KEY: &str = "o2ims:events";

fn object_ref(kind: ResourceKind, name: &str) -> String {
    match kind {
        ResourceKind::Node => format!("/o2ims/v1/resources/{name}"),
        ResourceKind::Namespace => format!("/o2ims/v1/resourcePools/{name}"),
    }
}

fn event_type(kind: ResourceKind, change: EventKind) -> String {
    match kind {
        ResourceKind::Node => format!("o2ims.Resource.{}", change.as_str()),
        ResourceKind::Namespace => format!("o2ims.ResourcePool.{}", change.as_str()),
    }
}

/// `notif-{name}-{nanos}`, qualified with the resource-type ID to avoid the
/// cross-type collision risk spec §9's Open Questions flags.
fn notification_id(resource_type_id: &str, name: &str, nanos: u128) -> String {
    format!("notif-{resource_type_id}-{name}-{nanos}")
}

fn build_event(kind: ResourceKind, change: EventKind, obj: &WatchedObject) -> ResourceEvent {
    let resource_type_id = kind.resource_type_id().to_owned();
    let now = Utc::now();
    let nanos = now.timestamp_nanos_opt().unwrap_or_default() as u128;
    ResourceEvent {
        subscription_id: String::new(),
        notification_event_type: event_type(kind, change),
        object_ref: object_ref(kind, &obj.name),
        resource_type_id: resource_type_id.clone(),
        resource_pool_id: match kind {
            ResourceKind::Node => obj.pool_label.clone().filter(|p| !p.is_empty()),
            ResourceKind::Namespace => None,
        },
        global_resource_id: obj.name.clone(),
        timestamp: now,
        notification_id: notification_id(&resource_type_id, &obj.name, nanos),
        callback_url: String::new(),
    }
}

/// The event emitter, registered as the [`ChangeHandler`] for a
/// [`crate::watch::WatchSource`].
pub struct Emitter {
    sender: mpsc::UnboundedSender<ResourceEvent>,
    queued: Arc<AtomicU64>,
}

impl Emitter {
    /// Spawns the background append task and returns the emitter to hand to
    /// the watch source, alongside the queued-event counter for metrics.
    pub fn spawn(log: Arc<dyn DurableEventLog>, max_stream_length: u64) -> Arc<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<ResourceEvent>();
        let queued = Arc::new(AtomicU64::new(0));
        let queued_task = queued.clone();

        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                queued_task.fetch_sub(1, Ordering::Relaxed);
                let payload = match serde_json::to_string(&event) {
                    Ok(p) => p,
                    Err(e) => {
                        error!(msg = "failed to serialize event", %e);
                        continue;
                    }
                };
                if let Err(e) = log
                    .append(&[("event", payload.as_str())], max_stream_length)
                    .await
                {
                    // Rationale: dropping here (rather than retrying in the
                    // watch dispatch path) keeps the watch loop unblocked;
                    // the next resync heals the gap.
                    warn!(msg = "log append failed, dropping event", notification_id = %event.notification_id, %e);
                }
            }
        });

        Arc::new(Self { sender, queued })
    }

    fn enqueue(&self, event: ResourceEvent) {
        self.queued.fetch_add(1, Ordering::Relaxed);
        if self.sender.send(event).is_err() {
            error!("emitter background task is gone, dropping event");
        }
    }
}

impl ChangeHandler for Emitter {
    fn on_add(&self, obj: &WatchedObject) {
        self.enqueue(build_event(obj.kind, EventKind::Created, obj));
    }

    fn on_update(&self, _old: &WatchedObject, new: &WatchedObject) {
        // Spurious updates (equal version tokens) are already filtered out
        // by the watch source before this callback fires (spec §4.1).
        self.enqueue(build_event(new.kind, EventKind::Updated, new));
    }

    fn on_delete(&self, obj: &DeletedObject) {
        match obj {
            DeletedObject::Known(obj) => {
                self.enqueue(build_event(obj.kind, EventKind::Deleted, obj));
            }
            DeletedObject::Tombstone { kind, name } => {
                // Recovered only the identity: synthesize the minimum object
                // needed to build the event (spec §4.1: "recover... or drop
                // the event with a logged error").
                let synthetic = WatchedObject {
                    kind: *kind,
                    name: name.clone(),
                    version: crate::watch::VersionToken(String::new()),
                    pool_label: None,
                };
                self.enqueue(build_event(*kind, EventKind::Deleted, &synthetic));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingLog {
        appended: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl DurableEventLog for RecordingLog {
        async fn append(&self, fields: &[(&str, &str)], _max_length: u64) -> crate::error::Result<String> {
            self.appended
                .lock()
                .unwrap()
                .push(fields[0].1.to_owned());
            Ok("0-1".to_owned())
        }
        async fn ensure_group(&self, _group: &str) -> crate::error::Result<()> {
            Ok(())
        }
        async fn read_group(
            &self,
            _group: &str,
            _consumer: &str,
            _block_timeout: std::time::Duration,
        ) -> crate::error::Result<Option<crate::log::LogEntry>> {
            Ok(None)
        }
        async fn ack(&self, _group: &str, _id: &str) -> crate::error::Result<()> {
            Ok(())
        }
        async fn pending(&self, _group: &str, _count: usize) -> crate::error::Result<Vec<String>> {
            Ok(vec![])
        }
        async fn len(&self) -> crate::error::Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn node_created_maps_to_resource_event() {
        let log = Arc::new(RecordingLog {
            appended: Mutex::new(Vec::new()),
        });
        let emitter = Emitter::spawn(log.clone(), 10_000);

        let obj = WatchedObject::node("test-node-1", "1", Some("test-pool"));
        emitter.on_add(&obj);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let appended = log.appended.lock().unwrap();
        assert_eq!(appended.len(), 1);
        let event: ResourceEvent = serde_json::from_str(&appended[0]).unwrap();
        assert_eq!(event.notification_event_type, "o2ims.Resource.Created");
        assert_eq!(event.object_ref, "/o2ims/v1/resources/test-node-1");
        assert_eq!(event.resource_type_id, "k8s-node");
        assert_eq!(event.resource_pool_id.as_deref(), Some("test-pool"));
        assert_eq!(event.global_resource_id, "test-node-1");
    }

    #[tokio::test]
    async fn namespace_created_has_no_pool_id() {
        let log = Arc::new(RecordingLog {
            appended: Mutex::new(Vec::new()),
        });
        let emitter = Emitter::spawn(log.clone(), 10_000);

        let obj = WatchedObject::namespace("test-namespace", "1");
        emitter.on_add(&obj);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let appended = log.appended.lock().unwrap();
        let event: ResourceEvent = serde_json::from_str(&appended[0]).unwrap();
        assert_eq!(event.notification_event_type, "o2ims.ResourcePool.Created");
        assert_eq!(event.object_ref, "/o2ims/v1/resourcePools/test-namespace");
        assert_eq!(event.resource_type_id, "k8s-namespace");
        assert!(event.resource_pool_id.is_none());
    }
}
