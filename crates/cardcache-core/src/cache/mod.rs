//! Cache storage for offline access.
//!
//! `CacheStorage` holds named namespaces; the proxy uses exactly one of them,
//! picked by the version tag. Each `CacheNamespace` maps a request's URL
//! (fragment removed) to the stored response. Only GET requests are stored.
//!
//! With `CacheStorage::on_disk` each namespace is written to
//! `<dir>/<name>.json` with base64 bodies, so entries survive restarts.

pub mod entry;
pub mod namespace;
pub mod storage;

pub use entry::CachedEntry;
pub use namespace::{CacheNamespace, EntryInfo};
pub use storage::CacheStorage;
