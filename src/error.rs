use thiserror::Error;

/// Errors produced while opening or reading an HDF5 resource.
///
/// The enum is `Clone` so a failure captured inside a worker can be handed
/// to every waiter on the promise; I/O errors are therefore flattened to
/// their message at construction time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum H5Error {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("bad signature in {0}")]
    BadSignature(&'static str),
    #[error("format error: {0}")]
    Format(String),
    #[error("unsupported feature: {0}")]
    Unsupported(String),
    #[error("invalid hyperslice: {0}")]
    Hyperslice(String),
    #[error("no such dataset in this request: {0}")]
    MissingDataset(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    /// The resource was closed while requests were still being issued.
    #[error("resource is closed")]
    Closed,
}

impl From<std::io::Error> for H5Error {
    fn from(e: std::io::Error) -> Self {
        H5Error::Io(e.to_string())
    }
}
