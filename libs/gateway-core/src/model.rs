//! Data model: `Subscription`, `HubRegistration`, `ResourceEvent`, and the
//! filter-matching rule they all share (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A filter triple matches a candidate `(pool, type, id)` triple iff, for
/// each dimension, the filter slot is empty or equals the candidate. An
/// all-empty filter matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterTriple {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl FilterTriple {
    pub fn matches(&self, pool: &str, r#type: &str, id: &str) -> bool {
        slot_matches(&self.resource_pool_id, pool)
            && slot_matches(&self.resource_type_id, r#type)
            && slot_matches(&self.resource_id, id)
    }
}

fn slot_matches(slot: &Option<String>, candidate: &str) -> bool {
    match slot {
        None => true,
        Some(value) => value.is_empty() || value == candidate,
    }
}

/// A durable registration binding a filter and a callback URL to receive
/// change notifications (spec §3, §4.4).
///
/// The store owns this type: callers only ever see read-only snapshots, and
/// `created_at`/`updated_at` are assigned by the store, never the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub callback_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_subscription_id: Option<String>,
    #[serde(flatten)]
    pub filter: FilterTriple,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A federation-protocol registration paralleling a `Subscription`, consumed
/// by the TMF688 delivery path (spec §3, §4.6).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HubRegistration {
    pub id: String,
    pub callback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub extensions: std::collections::BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Kind of semantic change observed on a watched resource (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "Created",
            EventKind::Updated => "Updated",
            EventKind::Deleted => "Deleted",
        }
    }
}

/// The wire/in-memory shape of a change event (spec §3, §6).
///
/// `subscription_id` and `callback_url` are blank at emission time and set
/// later during fan-out, per the emitter's chosen encoding (spec §4.2, §9).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEvent {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subscription_id: String,
    pub notification_event_type: String,
    pub object_ref: String,
    pub resource_type_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pool_id: Option<String>,
    pub global_resource_id: String,
    pub timestamp: DateTime<Utc>,
    pub notification_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub callback_url: String,
}

impl ResourceEvent {
    /// The `(pool, type, id)` candidate triple matched against subscription
    /// and hub filters (spec §3, invariant 3 in §8).
    pub fn candidate(&self) -> (&str, &str, &str) {
        (
            self.resource_pool_id.as_deref().unwrap_or(""),
            self.resource_type_id.as_str(),
            self.global_resource_id.as_str(),
        )
    }
}
