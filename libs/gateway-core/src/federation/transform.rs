//! Event-shape transform (spec §4.6, §9): translates a [`ResourceEvent`] into
//! the TMF688-flavored shape federation hubs expect. The transform is named
//! as an external collaborator by spec §4.6 — this is a minimal concrete
//! implementation so the federation path is exercisable end-to-end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ResourceEvent;

/// TMF688-shaped event envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationEvent {
    pub event_id: String,
    pub event_time: DateTime<Utc>,
    pub event_type: String,
    pub correlation_id: String,
    pub event: FederationEventPayload,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationEventPayload {
    pub resource: FederationResourceRef,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationResourceRef {
    pub id: String,
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_pool_id: Option<String>,
    pub resource_type_id: String,
}

/// Contract a federation transform must satisfy (spec §4.6, §9).
pub trait FederationTransform: Send + Sync {
    fn transform(&self, event: &ResourceEvent) -> FederationEvent;
}

/// Direct field mapping: no enrichment, no external lookups.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultFederationTransform;

impl FederationTransform for DefaultFederationTransform {
    fn transform(&self, event: &ResourceEvent) -> FederationEvent {
        FederationEvent {
            event_id: event.notification_id.clone(),
            event_time: event.timestamp,
            event_type: event.notification_event_type.clone(),
            correlation_id: event.global_resource_id.clone(),
            event: FederationEventPayload {
                resource: FederationResourceRef {
                    id: event.global_resource_id.clone(),
                    href: event.object_ref.clone(),
                    resource_pool_id: event.resource_pool_id.clone(),
                    resource_type_id: event.resource_type_id.clone(),
                },
            },
        }
    }
}
