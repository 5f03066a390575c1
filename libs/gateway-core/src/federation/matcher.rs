//! Hub-filter matcher (spec §4.6, §9): decides whether a hub registration's
//! query expression matches an event. Named as an external collaborator by
//! spec §4.6 — this is a minimal concrete implementation (a comma-separated
//! `key=value` expression over the same pool/type/id triple the subscription
//! filter uses) so the federation path is exercisable end-to-end.

use crate::model::{FilterTriple, HubRegistration, ResourceEvent};

/// Contract a hub matcher must satisfy (spec §4.6, §9).
pub trait HubMatcher: Send + Sync {
    fn matches(&self, hub: &HubRegistration, event: &ResourceEvent) -> bool;
}

/// Parses `hub.query` as `key=value` pairs joined by commas, over
/// `resourcePoolId`, `resourceTypeId`, `resourceId`. An absent or empty query
/// matches every event, mirroring `FilterTriple`'s all-empty-matches-all rule.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryExpressionMatcher;

impl QueryExpressionMatcher {
    fn parse(query: &str) -> FilterTriple {
        let mut filter = FilterTriple::default();
        for pair in query.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let value = value.trim().to_owned();
            match key.trim() {
                "resourcePoolId" => filter.resource_pool_id = Some(value),
                "resourceTypeId" => filter.resource_type_id = Some(value),
                "resourceId" => filter.resource_id = Some(value),
                _ => {}
            }
        }
        filter
    }
}

impl HubMatcher for QueryExpressionMatcher {
    fn matches(&self, hub: &HubRegistration, event: &ResourceEvent) -> bool {
        let filter = match &hub.query {
            Some(query) => Self::parse(query),
            None => FilterTriple::default(),
        };
        let (pool, type_id, id) = event.candidate();
        filter.matches(pool, type_id, id)
    }
}
