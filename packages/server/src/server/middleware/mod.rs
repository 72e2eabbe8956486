// HTTP middleware
pub mod auth;
pub mod request_context;

pub use auth::api_key_auth;
pub use request_context::request_context;
