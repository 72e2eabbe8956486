// HTTP routes
pub mod applications;
pub mod explain;
pub mod health;
pub mod jobs;
pub mod queues;
pub mod schedules;
pub mod subscriptions;
pub mod tracker;

pub use health::health_handler;
