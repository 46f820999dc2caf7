use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::H5Error;
use crate::io::driver::Driver;

/// Cache line width. Small on purpose: metadata parsing issues thousands of
/// 1..8 byte reads clustered inside object headers, and a narrow aligned
/// line turns each cluster into one driver call.
pub const CACHE_LINE_SIZE: usize = 0x10;
const CACHE_LINE_MASK: u64 = !(CACHE_LINE_SIZE as u64 - 1);

/// A byte source for one opened resource: the driver plus the aligned line
/// cache that absorbs small metadata reads. All positions passed in are
/// file-relative; the superblock's base address is added here.
///
/// Reads of at most one line go through the cache; anything larger (chunk
/// payloads, contiguous data) bypasses it so bulk data never churns lines.
pub struct Source {
    driver: Box<dyn Driver>,
    lines: Mutex<HashMap<u64, Vec<u8>>>,
    base: AtomicU64,
    caching: bool,
    driver_reads: AtomicUsize,
}

impl Source {
    pub fn new(driver: Box<dyn Driver>) -> Self {
        Self::with_caching(driver, true)
    }

    /// A source with the line cache disabled; every read goes to the
    /// driver. Byte-for-byte equivalent to the cached source.
    pub fn with_caching(driver: Box<dyn Driver>, caching: bool) -> Self {
        Self {
            driver,
            lines: Mutex::new(HashMap::new()),
            base: AtomicU64::new(0),
            caching,
            driver_reads: AtomicUsize::new(0),
        }
    }

    /// Set once the superblock's base address is known.
    pub fn set_base(&self, base: u64) {
        self.base.store(base, Ordering::Release);
    }

    pub fn base(&self) -> u64 {
        self.base.load(Ordering::Acquire)
    }

    /// Number of reads issued to the underlying driver so far.
    pub fn driver_reads(&self) -> usize {
        self.driver_reads.load(Ordering::Relaxed)
    }

    /// An independent source over the same resource: duplicated driver,
    /// empty cache, same base address.
    pub fn duplicate(&self) -> Result<Source, H5Error> {
        let source = Source::with_caching(self.driver.duplicate()?, self.caching);
        source.set_base(self.base());
        Ok(source)
    }

    pub fn close(&self) {
        self.driver.close();
    }

    /// Read `size` bytes at file position `pos`, through the cache when the
    /// request fits in a line.
    pub fn read(&self, pos: u64, size: usize) -> Result<Vec<u8>, H5Error> {
        if size == 0 {
            return Ok(Vec::new());
        }
        if size > CACHE_LINE_SIZE || !self.caching {
            return self.read_direct(pos, size);
        }

        let abs = pos + self.base();
        let line = abs & CACHE_LINE_MASK;
        let start = (abs - line) as usize;
        let stop = start + size;

        let mut lines = self.lines.lock();
        self.load_line(&mut lines, line)?;
        if stop <= CACHE_LINE_SIZE {
            let cached = &lines[&line];
            if stop > cached.len() {
                return Err(H5Error::Io(format!("read of {size} bytes at {pos} past end")));
            }
            Ok(cached[start..stop].to_vec())
        } else {
            // Request straddles two lines; concatenate.
            let next = line + CACHE_LINE_SIZE as u64;
            self.load_line(&mut lines, next)?;
            let head = &lines[&line];
            let tail = &lines[&next];
            let want_tail = stop - CACHE_LINE_SIZE;
            if head.len() < CACHE_LINE_SIZE || want_tail > tail.len() {
                return Err(H5Error::Io(format!("read of {size} bytes at {pos} past end")));
            }
            let mut out = Vec::with_capacity(size);
            out.extend_from_slice(&head[start..]);
            out.extend_from_slice(&tail[..want_tail]);
            Ok(out)
        }
    }

    /// Read exactly `size` bytes at file position `pos`, bypassing the
    /// cache. Used for chunk payloads and contiguous data.
    pub fn read_direct(&self, pos: u64, size: usize) -> Result<Vec<u8>, H5Error> {
        self.driver_reads.fetch_add(1, Ordering::Relaxed);
        self.driver.read(pos + self.base(), size)
    }

    fn load_line(
        &self,
        lines: &mut HashMap<u64, Vec<u8>>,
        line: u64,
    ) -> Result<(), H5Error> {
        if !lines.contains_key(&line) {
            self.driver_reads.fetch_add(1, Ordering::Relaxed);
            let data = self.driver.read_at_most(line, CACHE_LINE_SIZE)?;
            lines.insert(line, data);
        }
        Ok(())
    }
}
