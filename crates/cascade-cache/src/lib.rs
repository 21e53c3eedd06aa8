//! Persistent caching for CDN-fetched build content.
//!
//! Two layers:
//!
//! - [`DiskCache`]: content-addressed storage under one root with atomic
//!   writes and a coalesced aggregate-size record. No eviction; callers
//!   purge explicitly.
//! - [`CachedCdn`]: a [`cascade_cdn::CdnHosts`] fronted by the disk
//!   cache, with write-through on miss and hit/miss provenance.

mod cached;
mod disk;
mod error;

pub use cached::{CachedCdn, Provenance};
pub use disk::{CacheKey, DiskCache};
pub use error::{Error, Result};
