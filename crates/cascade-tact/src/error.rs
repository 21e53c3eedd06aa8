use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} file has incorrect magic - possibly wrong file format")]
    BadMagic(&'static str),

    #[error("unsupported {format} version {version}")]
    UnsupportedVersion { format: &'static str, version: u32 },

    #[error("truncated {0} structure")]
    Truncated(&'static str),

    #[error("file ID delta over- or under-flows")]
    FileIdDeltaOverflow,

    #[error("{0:?} is not a {1}-byte hex key")]
    InvalidKey(String, usize),

    #[error("checksum mismatch in {0}")]
    ChecksumMismatch(&'static str),

    #[error("block index {0} is out of range, must be less than {1}")]
    BlockIndexOutOfRange(u64, u64),

    #[error("no index footer matches the file checksum")]
    FooterNotFound,

    #[error("config has no usable {0:?} entry")]
    ConfigKey(&'static str),

    #[error("manifest line {line}: {reason}")]
    ManifestSyntax { line: usize, reason: String },

    #[error("manifest has no {0:?} column")]
    MissingColumn(String),
}
