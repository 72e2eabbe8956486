// Common types and utilities shared across the application

pub mod envelope;
pub mod error;

pub use envelope::{failure, success, Envelope, RequestId, ResponseMetadata};
pub use error::ServiceError;
