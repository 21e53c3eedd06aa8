//! Parsers for the TACT table formats.
//!
//! TACT content distribution describes a build through a handful of small
//! binary and text formats. This crate parses all of them into queryable
//! in-memory tables:
//!
//! - [`encoding`]: the paged content-key to encoding-key table
//! - [`root`]: file-id and name-hash resolution with locale/content flags
//! - [`archive_index`]: CDN archive `.index` files (offset lookup)
//! - [`idx`]: local installation `.idx` bucket indices
//! - [`config`]: build and CDN `key = value` config documents
//! - [`manifest`]: pipe-separated version/CDN manifests and `.build.info`
//! - [`install`]: the tagged install manifest
//! - [`jenkins3`]: `lookup3` path hashing used by root name lookups
//!
//! Everything parses from bytes already in memory; fetching those bytes is
//! the transport crates' concern.

pub mod archive_index;
pub mod config;
pub mod encoding;
mod error;
pub mod idx;
pub mod install;
mod ioutils;
pub mod jenkins3;
pub mod keys;
pub mod manifest;
pub mod root;

pub use error::Error;
pub use idx::ArchiveLocation;
pub use keys::{ContentKey, EncodingKey};

pub type Result<T> = std::result::Result<T, Error>;
