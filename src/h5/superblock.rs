use log::info;

use crate::error::H5Error;
use crate::io::Source;

/// HDF5 file signature, little-endian: `\x89HDF\r\n\x1a\n`.
const H5_SIGNATURE_LE: u64 = 0x0A1A0A0D46444889;

/// Global file parameters extracted from the superblock.
#[derive(Debug, Clone, PartialEq)]
pub struct FileContext {
    pub offset_size: u8,
    pub length_size: u8,
    pub base_address: u64,
    pub root_address: u64,
}

impl FileContext {
    /// The "undefined address" sentinel: all ones at the offset width.
    pub fn undef(&self) -> u64 {
        if self.offset_size >= 8 {
            u64::MAX
        } else {
            (1u64 << (self.offset_size as u32 * 8)) - 1
        }
    }
}

fn field(src: &Source, pos: u64, width: u8) -> Result<u64, H5Error> {
    let raw = src.read(pos, width as usize)?;
    let mut le = [0u8; 8];
    le[..raw.len()].copy_from_slice(&raw);
    Ok(u64::from_le_bytes(le))
}

/// Parse the superblock at offset 0 and record the base address on the
/// source. Versions 0 and 2 are supported.
pub fn read_superblock(src: &Source, error_checking: bool) -> Result<FileContext, H5Error> {
    let signature = field(src, 0, 8)?;
    if signature != H5_SIGNATURE_LE {
        return Err(H5Error::BadSignature("file superblock"));
    }
    let version = field(src, 8, 1)?;

    let (offset_size, length_size, base_address, root_address) = match version {
        0 => {
            if error_checking {
                let freespace_version = field(src, 9, 1)?;
                let roottable_version = field(src, 10, 1)?;
                if freespace_version != 0 {
                    return Err(H5Error::Format(format!(
                        "unsupported free space version: {freespace_version}"
                    )));
                }
                if roottable_version != 0 {
                    return Err(H5Error::Format(format!(
                        "unsupported root table version: {roottable_version}"
                    )));
                }
            }
            let offset_size = field(src, 13, 1)? as u8;
            let length_size = field(src, 14, 1)? as u8;
            let base = field(src, 24, offset_size)?;
            let root = field(src, 24 + 5 * offset_size as u64, offset_size)?;
            (offset_size, length_size, base, root)
        }
        2 => {
            let offset_size = field(src, 9, 1)? as u8;
            let length_size = field(src, 10, 1)? as u8;
            let base = field(src, 12, offset_size)?;
            let root = field(src, 12 + 3 * offset_size as u64, offset_size)?;
            (offset_size, length_size, base, root)
        }
        other => {
            return Err(H5Error::Format(format!(
                "unsupported superblock version: {other}"
            )));
        }
    };

    if !matches!(offset_size, 1 | 2 | 4 | 8) || !matches!(length_size, 1 | 2 | 4 | 8) {
        return Err(H5Error::Format(format!(
            "unsupported offset/length sizes: {offset_size}/{length_size}"
        )));
    }

    src.set_base(base_address);
    info!(
        "superblock v{version}: offsets={offset_size} lengths={length_size} \
         base={base_address:#x} root={root_address:#x}"
    );

    Ok(FileContext {
        offset_size,
        length_size,
        base_address,
        root_address,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::FileDriver;
    use std::io::Write;

    fn source_over(contents: &[u8]) -> (tempfile::NamedTempFile, Source) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(contents).unwrap();
        let driver = FileDriver::open(tmp.path().to_str().unwrap()).unwrap();
        (tmp, Source::new(Box::new(driver)))
    }

    fn v0_superblock() -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(b"\x89HDF\r\n\x1a\n");
        b.push(0); // superblock version
        b.push(0); // free space version
        b.push(0); // root group version
        b.push(0); // reserved
        b.push(0); // shared header message version
        b.push(8); // offset size
        b.push(8); // length size
        b.push(0); // reserved
        b.extend_from_slice(&4u16.to_le_bytes()); // group leaf k
        b.extend_from_slice(&16u16.to_le_bytes()); // group internal k
        b.extend_from_slice(&0u32.to_le_bytes()); // consistency flags
        b.extend_from_slice(&0u64.to_le_bytes()); // base address
        b.extend_from_slice(&u64::MAX.to_le_bytes()); // free space address
        b.extend_from_slice(&4096u64.to_le_bytes()); // end of file
        b.extend_from_slice(&u64::MAX.to_le_bytes()); // driver info
        b.extend_from_slice(&0u64.to_le_bytes()); // root link name offset
        b.extend_from_slice(&0x60u64.to_le_bytes()); // root object header address
        b
    }

    #[test]
    fn parses_version_0() {
        let (_tmp, src) = source_over(&v0_superblock());
        let ctx = read_superblock(&src, true).unwrap();
        assert_eq!(ctx.offset_size, 8);
        assert_eq!(ctx.length_size, 8);
        assert_eq!(ctx.base_address, 0);
        assert_eq!(ctx.root_address, 0x60);
        assert_eq!(ctx.undef(), u64::MAX);
    }

    #[test]
    fn parses_version_2() {
        let mut b = Vec::new();
        b.extend_from_slice(b"\x89HDF\r\n\x1a\n");
        b.push(2); // superblock version
        b.push(8); // offset size
        b.push(8); // length size
        b.push(0); // consistency flags
        b.extend_from_slice(&0u64.to_le_bytes()); // base address
        b.extend_from_slice(&0u64.to_le_bytes()); // extension address
        b.extend_from_slice(&4096u64.to_le_bytes()); // end of file
        b.extend_from_slice(&0x30u64.to_le_bytes()); // root object header address
        let (_tmp, src) = source_over(&b);
        let ctx = read_superblock(&src, true).unwrap();
        assert_eq!(ctx.root_address, 0x30);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut b = v0_superblock();
        b[0] = 0x88;
        let (_tmp, src) = source_over(&b);
        assert_eq!(
            read_superblock(&src, true),
            Err(H5Error::BadSignature("file superblock"))
        );
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut b = v0_superblock();
        b[8] = 1;
        let (_tmp, src) = source_over(&b);
        assert!(matches!(read_superblock(&src, true), Err(H5Error::Format(_))));
    }

    #[test]
    fn error_checking_off_skips_reserved_version_checks() {
        let mut b = v0_superblock();
        b[9] = 9; // bogus free-space version
        let (_tmp, src) = source_over(&b);
        assert!(read_superblock(&src, true).is_err());
        assert!(read_superblock(&src, false).is_ok());
    }

    #[test]
    fn narrow_offset_sentinel() {
        let ctx = FileContext {
            offset_size: 4,
            length_size: 4,
            base_address: 0,
            root_address: 0,
        };
        assert_eq!(ctx.undef(), 0xFFFF_FFFF);
    }
}
