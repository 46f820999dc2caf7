use crate::error::H5Error;

/// Byte-range access to an opened resource (object store, HTTP endpoint,
/// local file).
///
/// Implementations must be safe to share between worker threads.
pub trait Driver: Send + Sync {
    /// Fetch up to `size` bytes starting at byte `offset`. Returns fewer
    /// bytes only when the range runs past the end of the resource. Used by
    /// the line cache, whose aligned loads may straddle EOF.
    fn read_at_most(&self, offset: u64, size: usize) -> Result<Vec<u8>, H5Error>;

    /// Fetch exactly `size` bytes starting at byte `offset`, or fail.
    fn read(&self, offset: u64, size: usize) -> Result<Vec<u8>, H5Error> {
        let data = self.read_at_most(offset, size)?;
        if data.len() != size {
            return Err(H5Error::Io(format!(
                "read at {offset} returned {} bytes, wanted {size}",
                data.len()
            )));
        }
        Ok(data)
    }

    /// Produce an independent handle suitable for another worker: a fresh
    /// connection pool or file descriptor against the same resource.
    fn duplicate(&self) -> Result<Box<dyn Driver>, H5Error>;

    /// Release underlying resources. Idempotent; reads after close fail
    /// with [`H5Error::Closed`].
    fn close(&self);
}
