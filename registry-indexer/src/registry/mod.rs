//! Docker Registry v2 client: authentication, catalog/tag listing and
//! manifest/config resolution for one or more configured upstream
//! registries.

mod auth;
mod client;

pub use auth::Credentials;
pub use client::RegistryClient;
