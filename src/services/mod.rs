//! External collaborator handles consumed by the assembled modules.

pub mod cache;
pub mod db;
pub mod secrets;

pub use cache::CacheHandle;
pub use db::DatabaseHandle;
pub use secrets::{SecretStoreError, VaultClient};
