//! Watch Source contract (spec §4.1): a cache-backed view over two resource
//! categories — Nodes ("Resources") and Namespaces ("Resource Pools") — that
//! invokes add/update/delete callbacks only after an initial sync completes,
//! re-fires adds on a periodic resync to heal missed transitions, and
//! suppresses spurious updates via a monotonic version token.
//!
//! Real cluster connectivity is explicitly out of scope (spec §1); this
//! module specifies the trait a watch source must satisfy and ships the
//! in-memory [`fake`] implementation used by the emitter's tests and as the
//! reference semantics for a production implementation backed by a real
//! client-go-style informer.

pub mod fake;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// The two resource categories this core watches (spec §4.2 mapping table).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Node,
    Namespace,
}

impl ResourceKind {
    pub fn resource_type_id(&self) -> &'static str {
        match self {
            ResourceKind::Node => "k8s-node",
            ResourceKind::Namespace => "k8s-namespace",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Node => write!(f, "Node"),
            ResourceKind::Namespace => write!(f, "Namespace"),
        }
    }
}

/// A monotonic version token used for spurious-update suppression (spec §4.1,
/// invariant 6 in §8). Stands in for a Kubernetes `resourceVersion`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionToken(pub String);

/// A watched object as observed by the source, post-change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchedObject {
    pub kind: ResourceKind,
    pub name: String,
    pub version: VersionToken,
    /// Value of the `resource-pool` label on a Node; always `None` for a
    /// Namespace (a namespace IS a pool, spec §4.2).
    pub pool_label: Option<String>,
}

/// A delete callback's argument: either the last-known object, or — when the
/// object has already been garbage-collected — a tombstone carrying only its
/// identity (spec §4.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeletedObject {
    Known(WatchedObject),
    Tombstone { kind: ResourceKind, name: String },
}

impl DeletedObject {
    pub fn kind(&self) -> ResourceKind {
        match self {
            DeletedObject::Known(obj) => obj.kind,
            DeletedObject::Tombstone { kind, .. } => *kind,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DeletedObject::Known(obj) => &obj.name,
            DeletedObject::Tombstone { name, .. } => name,
        }
    }
}

/// Callbacks fired by the watch source after initial sync. Implementations
/// MUST be cheap (parse + single log append) and MUST NOT perform HTTP
/// delivery (spec §5) — the emitter is the only intended consumer.
pub trait ChangeHandler: Send + Sync {
    fn on_add(&self, obj: &WatchedObject);
    fn on_update(&self, old: &WatchedObject, new: &WatchedObject);
    fn on_delete(&self, obj: &DeletedObject);
}

/// Contract a watch source must satisfy (spec §4.1).
#[async_trait]
pub trait WatchSource: Send + Sync {
    /// Performs the initial list+watch, populates the cache, and runs until
    /// cancelled. MUST NOT invoke `handler` before the initial sync
    /// completes. MUST fail if initial sync exceeds `sync_deadline`.
    async fn run(
        self: Arc<Self>,
        handler: Arc<dyn ChangeHandler>,
        resync_period: Duration,
        sync_deadline: Duration,
    ) -> Result<()>;
}
