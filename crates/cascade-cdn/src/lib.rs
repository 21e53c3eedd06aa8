//! Remote retrieval for CDN-hosted build content.
//!
//! Builds are distributed as content-addressed blobs behind plain
//! HTTP(S) GETs: configs and indices fetched whole, archived content
//! fetched as byte ranges. This crate supplies the transport half of
//! that story:
//!
//! - [`CdnClient`]: retrying HTTP client with backoff and range support
//! - [`CdnHosts`]: a prioritized host list walked on every fetch
//! - [`PatchServer`]: `versions`/`cdns` build discovery
//!
//! What the fetched bytes mean is `cascade-tact`'s concern; persistent
//! caching lives in `cascade-cache`.

mod client;
mod error;
mod hosts;
mod patch;

pub use client::{build_url, ByteRange, CdnClient, PathKind, RetryPolicy};
pub use error::{Error, Result};
pub use hosts::CdnHosts;
pub use patch::{PatchServer, Region, KNOWN_PRODUCTS};
