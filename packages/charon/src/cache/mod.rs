//! The multi-tier cache store (folder listings, tags, generic TTL data, and
//! script validation results) plus its hot-folder MRU overlay.

mod entry;
mod store;

pub use entry::CacheEntry;
pub use store::{CacheStats, CacheStore, FolderListing, ScriptValidationRecord};
