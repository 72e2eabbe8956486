//! Subscription store and webhook fanout.

pub mod fanout;
pub mod model;
pub mod store;

pub use fanout::{build_payload, DeliveryOutcome, SubscriptionFanout};
pub use model::{
    validate_endpoint, DeliveryMethod, RetryConfig, Subscription, SubscriptionFilters,
};
pub use store::SubscriptionStore;
