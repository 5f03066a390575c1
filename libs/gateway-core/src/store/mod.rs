//! Persistent stores (spec §4.4, §4.6): subscriptions and federation hub
//! registrations.

pub mod fake;
pub mod hub;
pub mod subscription;

pub use hub::{HubStore, RedisHubStore};
pub use subscription::{RedisSubscriptionStore, SubscriptionStore};
