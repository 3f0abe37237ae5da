//! REST surface under `/files`.

mod auth;
mod errors;
mod extractors;
pub mod handlers;
mod send_file;
mod serializer;

pub use auth::{Action, AllowAll, AuthTarget, AuthorizationOracle, Decision, Principal};
pub use errors::ApiError;
pub use extractors::{BucketPath, ObjectPath};
