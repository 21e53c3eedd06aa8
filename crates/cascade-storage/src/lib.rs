//! Source manager over content-addressed game storage.
//!
//! Resolves a logical file identifier to decoded bytes through layered
//! lookup tables:
//!
//! ```text
//! file id / path ─ root ─> content key ─ encoding ─> encoding key
//!     ─ index set ─> location ─ local archive or CDN ─> raw bytes
//!     ─ BLTE decode ─> content
//! ```
//!
//! [`Storage`] owns one immutable table set per build behind a
//! swappable handle: readers resolve against the generation they
//! started with while a reload swaps a new one in. Blobs come from a
//! [`LocalInstall`] or a cached CDN ([`RemoteSource`]); lifecycle
//! progress surfaces through the [`EventRegistry`] and long operations
//! honor a [`CancellationToken`].

mod cancel;
mod error;
mod events;
mod index;
mod local;
mod manager;
mod remote;

pub use cancel::CancellationToken;
pub use error::{Error, Result};
pub use events::{EventRegistry, RegistrationId, StorageEvent};
pub use index::IndexSet;
pub use local::LocalInstall;
pub use manager::{Build, FileProvider, Storage, StorageOptions};
pub use remote::RemoteSource;
