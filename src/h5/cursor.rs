use crate::error::H5Error;
use crate::h5::superblock::FileContext;
use crate::io::Source;

/// A little-endian field reader over the shared range-cached source.
///
/// The cursor is the only mutable state of the metadata walk: handlers
/// advance it, save it, jump to side structures (heaps, B-trees,
/// continuations) and restore it. Cache lookups behind it never require
/// exclusive access.
pub struct Cursor<'a> {
    src: &'a Source,
    ctx: &'a FileContext,
    pub pos: u64,
}

impl<'a> Cursor<'a> {
    pub fn new(src: &'a Source, ctx: &'a FileContext, pos: u64) -> Self {
        Self { src, ctx, pos }
    }

    pub fn ctx(&self) -> &'a FileContext {
        self.ctx
    }

    pub fn source(&self) -> &'a Source {
        self.src
    }

    /// A second cursor over the same source, used for side excursions that
    /// must not disturb this cursor's position.
    pub fn fork(&self, pos: u64) -> Cursor<'a> {
        Cursor::new(self.src, self.ctx, pos)
    }

    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    pub fn skip(&mut self, n: u64) {
        self.pos += n;
    }

    /// Read an unsigned little-endian integer of `width` bytes (1, 2, 4 or
    /// 8) and advance.
    pub fn field(&mut self, width: u8) -> Result<u64, H5Error> {
        if !matches!(width, 1 | 2 | 4 | 8) {
            return Err(H5Error::Format(format!("invalid field width: {width}")));
        }
        let raw = self.src.read(self.pos, width as usize)?;
        self.pos += width as u64;
        let mut le = [0u8; 8];
        le[..raw.len()].copy_from_slice(&raw);
        Ok(u64::from_le_bytes(le))
    }

    /// Read `width` bytes without advancing.
    pub fn peek(&self, width: u8) -> Result<u64, H5Error> {
        let mut probe = self.fork(self.pos);
        probe.field(width)
    }

    pub fn u8(&mut self) -> Result<u8, H5Error> {
        Ok(self.field(1)? as u8)
    }

    pub fn u16(&mut self) -> Result<u16, H5Error> {
        Ok(self.field(2)? as u16)
    }

    pub fn u32(&mut self) -> Result<u32, H5Error> {
        Ok(self.field(4)? as u32)
    }

    pub fn u64(&mut self) -> Result<u64, H5Error> {
        self.field(8)
    }

    /// A file offset, at the superblock's offset width.
    pub fn offset(&mut self) -> Result<u64, H5Error> {
        self.field(self.ctx.offset_size)
    }

    /// A length, at the superblock's length width.
    pub fn length(&mut self) -> Result<u64, H5Error> {
        self.field(self.ctx.length_size)
    }

    /// Read `n` raw bytes and advance.
    pub fn bytes(&mut self, n: usize) -> Result<Vec<u8>, H5Error> {
        let raw = self.src.read(self.pos, n)?;
        self.pos += n as u64;
        Ok(raw)
    }

    /// Read a NUL-terminated string starting at the cursor.
    pub fn cstring(&mut self) -> Result<String, H5Error> {
        let mut out = Vec::new();
        loop {
            let b = self.bytes(1)?[0];
            if b == 0 {
                break;
            }
            out.push(b);
        }
        String::from_utf8(out).map_err(|e| H5Error::Format(format!("bad utf-8 in name: {e}")))
    }

    /// True if `addr` is the all-ones "undefined address" sentinel.
    pub fn is_undef(&self, addr: u64) -> bool {
        addr == self.ctx.undef()
    }
}
