//! An in-memory [`WatchSource`] used by the emitter's tests and as a driver
//! for exercising the pipeline without a real cluster (spec §1, §9).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval, timeout};

use super::{ChangeHandler, DeletedObject, ResourceKind, VersionToken, WatchSource, WatchedObject};
use crate::error::{Error, Result};

enum Mutation {
    Upsert(WatchedObject),
    Delete(DeletedObject),
}

/// A test double standing in for a real client-go-style informer.
///
/// Callers seed it with an initial object set, then drive further
/// transitions with [`FakeWatchSource::upsert`] / [`FakeWatchSource::delete`]
/// / [`FakeWatchSource::delete_tombstone`] while [`WatchSource::run`] is
/// driving callbacks concurrently.
pub struct FakeWatchSource {
    initial: Vec<WatchedObject>,
    sender: mpsc::UnboundedSender<Mutation>,
    receiver: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Mutation>>>,
    synced: Arc<Notify>,
    /// Artificial delay before signaling synced, used to exercise the
    /// startup-deadline failure path.
    sync_delay: Duration,
}

impl FakeWatchSource {
    pub fn new(initial: Vec<WatchedObject>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            initial,
            sender,
            receiver: tokio::sync::Mutex::new(Some(receiver)),
            synced: Arc::new(Notify::new()),
            sync_delay: Duration::ZERO,
        }
    }

    pub fn with_sync_delay(mut self, delay: Duration) -> Self {
        self.sync_delay = delay;
        self
    }

    pub fn upsert(&self, obj: WatchedObject) {
        let _ = self.sender.send(Mutation::Upsert(obj));
    }

    pub fn delete(&self, obj: WatchedObject) {
        let _ = self
            .sender
            .send(Mutation::Delete(DeletedObject::Known(obj)));
    }

    pub fn delete_tombstone(&self, kind: ResourceKind, name: &str) {
        let _ = self.sender.send(Mutation::Delete(DeletedObject::Tombstone {
            kind,
            name: name.to_owned(),
        }));
    }
}

#[async_trait]
impl WatchSource for FakeWatchSource {
    async fn run(
        self: Arc<Self>,
        handler: Arc<dyn ChangeHandler>,
        resync_period: Duration,
        sync_deadline: Duration,
    ) -> Result<()> {
        let mut cache: HashMap<(ResourceKind, String), WatchedObject> = HashMap::new();
        for obj in &self.initial {
            cache.insert((obj.kind, obj.name.clone()), obj.clone());
        }

        let synced = self.synced.clone();
        let sync_delay = self.sync_delay;
        let sync_task = async move {
            if !sync_delay.is_zero() {
                tokio::time::sleep(sync_delay).await;
            }
            synced.notify_waiters();
        };
        if timeout(sync_deadline, sync_task).await.is_err() {
            return Err(Error::Transient(
                "watch source initial sync exceeded deadline".into(),
            ));
        }

        // Initial sync fires adds for every pre-seeded object, same as the
        // periodic resync below.
        for obj in cache.values() {
            handler.on_add(obj);
        }

        let mut receiver = self
            .receiver
            .lock()
            .await
            .take()
            .expect("run() called only once per FakeWatchSource");
        let mut resync = interval(resync_period);
        resync.tick().await; // first tick fires immediately; consume it

        loop {
            tokio::select! {
                mutation = receiver.recv() => {
                    match mutation {
                        Some(Mutation::Upsert(new)) => {
                            let key = (new.kind, new.name.clone());
                            match cache.get(&key) {
                                Some(old) if old.version == new.version => {
                                    // spurious update: drop before any downstream work
                                }
                                Some(old) => {
                                    let old = old.clone();
                                    cache.insert(key, new.clone());
                                    handler.on_update(&old, &new);
                                }
                                None => {
                                    cache.insert(key, new.clone());
                                    handler.on_add(&new);
                                }
                            }
                        }
                        Some(Mutation::Delete(deleted)) => {
                            let key = (deleted.kind(), deleted.name().to_owned());
                            cache.remove(&key);
                            handler.on_delete(&deleted);
                        }
                        None => return Ok(()),
                    }
                }
                _ = resync.tick() => {
                    for obj in cache.values() {
                        handler.on_add(obj);
                    }
                }
            }
        }
    }
}

impl WatchedObject {
    pub fn node(name: &str, version: &str, pool_label: Option<&str>) -> Self {
        Self {
            kind: ResourceKind::Node,
            name: name.to_owned(),
            version: VersionToken(version.to_owned()),
            pool_label: pool_label.map(str::to_owned),
        }
    }

    pub fn namespace(name: &str, version: &str) -> Self {
        Self {
            kind: ResourceKind::Namespace,
            name: name.to_owned(),
            version: VersionToken(version.to_owned()),
            pool_label: None,
        }
    }
}
