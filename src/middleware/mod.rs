pub mod auth;
pub mod request_meta;

pub use auth::RequestScope;
pub use request_meta::RequestId;
