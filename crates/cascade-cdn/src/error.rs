use thiserror::Error;

/// Result type for CDN operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure from the HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The CDN does not serve this hash (terminal 404).
    #[error("content {hash} not found on the CDN")]
    NotFound { hash: String },

    /// A non-retryable status the protocol does not expect.
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    /// Retries against one host were exhausted.
    #[error("{attempts} attempts against {url} failed: {last}")]
    RetriesExhausted {
        attempts: u32,
        url: String,
        last: String,
    },

    /// Every configured host failed for this request.
    #[error("all {hosts} CDN hosts failed: {last}")]
    AllHostsFailed { hosts: usize, last: Box<Error> },

    /// The host list is empty; nothing can be fetched at all.
    #[error("no CDN hosts are configured")]
    NoHosts,

    /// A content hash is not plausible hex.
    #[error("{0:?} is not a hex content hash")]
    InvalidHash(String),

    /// A patch-server manifest failed to parse.
    #[error("manifest error: {0}")]
    Manifest(#[from] cascade_tact::Error),

    /// The requested region has no row in the versions manifest.
    #[error("no {region} row in the versions manifest")]
    RegionMissing { region: String },
}
