//! Federation Publisher (spec §4.6): a second consumer group over the
//! primary event log, isolated from webhook delivery, that transforms and
//! fans events out to TMF688 hub registrations.

pub mod matcher;
pub mod publisher;
pub mod transform;

pub use matcher::{HubMatcher, QueryExpressionMatcher};
pub use publisher::{FederationConfig, FederationPublisher, CONSUMER_GROUP, CONSUMER_NAME};
pub use transform::{DefaultFederationTransform, FederationEvent, FederationTransform};
