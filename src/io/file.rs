use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::H5Error;
use crate::io::driver::Driver;

/// Local-file driver. One descriptor, shared by all workers under a lock;
/// `duplicate` opens a fresh descriptor instead.
pub struct FileDriver {
    path: String,
    file: Mutex<File>,
    closed: AtomicBool,
}

impl FileDriver {
    pub fn open(path: &str) -> Result<Self, H5Error> {
        let file = File::open(path)
            .map_err(|e| H5Error::Io(format!("failed to open {path}: {e}")))?;
        Ok(Self {
            path: path.to_string(),
            file: Mutex::new(file),
            closed: AtomicBool::new(false),
        })
    }
}

impl Driver for FileDriver {
    fn read_at_most(&self, offset: u64, size: usize) -> Result<Vec<u8>, H5Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(H5Error::Closed);
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; size];
        let mut total = 0;
        while total < size {
            let n = file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        buf.truncate(total);
        Ok(buf)
    }

    fn duplicate(&self) -> Result<Box<dyn Driver>, H5Error> {
        Ok(Box::new(FileDriver::open(&self.path)?))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
