use log::debug;

use crate::error::H5Error;
use crate::h5::header::HeaderWalk;

/// "FRHP", little-endian.
const H5_FRHP_SIGNATURE_LE: u32 = 0x50485246;
/// "FHDB", little-endian.
const H5_FHDB_SIGNATURE_LE: u32 = 0x42444846;
/// "FHIB", little-endian.
const H5_FHIB_SIGNATURE_LE: u32 = 0x42494846;

/// Position of the most significant set bit (0 for 0 and 1).
pub(crate) fn highest_bit(value: u64) -> u64 {
    if value == 0 {
        0
    } else {
        63 - value.leading_zeros() as u64
    }
}

/// Block size of a fractal-heap row: the first two rows use the starting
/// block size, every later row doubles.
pub(crate) fn row_block_size(row: u64, starting_blk_size: u64) -> u64 {
    if row < 2 {
        starting_blk_size
    } else {
        starting_blk_size * (0x2 << (row - 2))
    }
}

/// Transient state while harvesting one fractal heap.
pub(crate) struct HeapInfo {
    table_width: u64,
    curr_num_rows: u64,
    starting_blk_size: u64,
    max_dblk_size: u64,
    blk_offset_size: u64,
    dblk_checksum: bool,
    msg_type: u16,
    cur_objects: u64,
}

impl HeaderWalk<'_> {
    /// Parse a fractal heap header and harvest `msg_type` messages (LINK or
    /// ATTRIBUTE) from its blocks. The cursor must sit on the heap header;
    /// the caller restores the cursor afterwards.
    pub(crate) fn read_fractal_heap(
        &mut self,
        msg_type: u16,
        hdr_flags: u8,
        depth: usize,
    ) -> Result<(), H5Error> {
        const FRHP_CHECKSUM_DIRECT_BLOCKS: u8 = 0x02;

        let signature = self.cur.u32()?;
        let version = self.cur.u8()?;
        let _heap_obj_id_len = self.cur.u16()?;
        let io_filter_len = self.cur.u16()?;
        let flags = self.cur.u8()?;
        let _max_size_mg_obj = self.cur.u32()?;
        let _next_huge_obj_id = self.cur.length()?;
        let _btree_addr_huge_obj = self.cur.offset()?;
        let _free_space_mg_blks = self.cur.length()?;
        let _addr_free_space_mg = self.cur.offset()?;
        let _mg_space = self.cur.length()?;
        let _alloc_mg_space = self.cur.length()?;
        let _dblk_alloc_iter = self.cur.length()?;
        let mg_objs = self.cur.length()?;
        let _huge_obj_size = self.cur.length()?;
        let _huge_objs = self.cur.length()?;
        let _tiny_obj_size = self.cur.length()?;
        let _tiny_objs = self.cur.length()?;
        let table_width = self.cur.u16()? as u64;
        let starting_blk_size = self.cur.length()?;
        let max_dblk_size = self.cur.length()?;
        let max_heap_size = self.cur.u16()? as u64;
        let _start_num_rows = self.cur.u16()?;
        let root_blk_addr = self.cur.offset()?;
        let curr_num_rows = self.cur.u16()? as u64;

        if self.opts.error_checking {
            if signature != H5_FRHP_SIGNATURE_LE {
                return Err(H5Error::BadSignature("fractal heap"));
            }
            if version != 0 {
                return Err(H5Error::Format(format!(
                    "unsupported fractal heap version: {version}"
                )));
            }
        }

        if io_filter_len > 0 {
            return Err(H5Error::Unsupported(
                "I/O filters on a fractal heap".into(),
            ));
        }

        self.cur.skip(4); // checksum

        debug!(
            "fractal heap [{depth}]: width={table_width} start={starting_blk_size} \
             rows={curr_num_rows} objects={mg_objs}"
        );

        let mut info = HeapInfo {
            table_width,
            curr_num_rows,
            starting_blk_size,
            max_dblk_size,
            blk_offset_size: (max_heap_size + 7) / 8,
            dblk_checksum: flags & FRHP_CHECKSUM_DIRECT_BLOCKS != 0,
            msg_type,
            cur_objects: 0,
        };

        self.cur.seek(root_blk_addr);
        if info.curr_num_rows == 0 {
            // The root block is a single direct block.
            let bytes_read = self.read_direct_block(&mut info, starting_blk_size, hdr_flags, depth)?;
            if self.opts.error_checking && bytes_read > starting_blk_size {
                return Err(H5Error::Format(format!(
                    "direct block contained more bytes than specified: \
                     {bytes_read} > {starting_blk_size}"
                )));
            }
        } else {
            self.read_indirect_block(&mut info, 0, hdr_flags, depth)?;
        }
        Ok(())
    }

    /// One FHDB direct block: run the harvested message handler until the
    /// block space is exhausted or a zero peek terminates it early.
    fn read_direct_block(
        &mut self,
        info: &mut HeapInfo,
        block_size: u64,
        hdr_flags: u8,
        depth: usize,
    ) -> Result<u64, H5Error> {
        let start = self.cur.pos;

        if self.opts.error_checking {
            let signature = self.cur.u32()?;
            let version = self.cur.u8()?;
            if signature != H5_FHDB_SIGNATURE_LE {
                return Err(H5Error::BadSignature("heap direct block"));
            }
            if version != 0 {
                return Err(H5Error::Format(format!(
                    "invalid direct block version: {version}"
                )));
            }
        } else {
            self.cur.skip(5);
        }

        // Heap header address, then the variable-width block offset (whose
        // width can be a non-standard integer size, so it is skipped).
        self.cur.skip(self.cur.ctx().offset_size as u64);
        self.cur.skip(info.blk_offset_size);
        if info.dblk_checksum {
            self.cur.skip(4);
        }

        let header_size = 5
            + self.cur.ctx().offset_size as u64
            + info.blk_offset_size
            + if info.dblk_checksum { 4 } else { 0 };
        let mut data_left = block_size.saturating_sub(header_size);

        while data_left > 0 {
            // Peek for an all-zero message slot, which ends the block early.
            let peek_width = (1u64 << highest_bit(data_left)).min(8) as u8;
            if self.cur.peek(peek_width)? == 0 {
                debug!("direct block @{start:#x} ended early @{:#x}", self.cur.pos);
                break;
            }

            let msg_size = data_left.min(u16::MAX as u64) as u16;
            let data_read = self.read_message(info.msg_type, msg_size, hdr_flags, depth)?;
            info.cur_objects += 1;

            if data_read > data_left {
                if self.opts.error_checking {
                    return Err(H5Error::Format(format!(
                        "message exceeded end of direct block @{start:#x}"
                    )));
                }
                data_left = 0;
            } else {
                data_left -= data_read;
            }

            if self.opts.early_exit && self.found {
                break;
            }
        }

        // Skip to the block end (meaningful only after an early exit).
        self.cur.skip(data_left);
        Ok(self.cur.pos - start)
    }

    /// One FHIB indirect block: recurse into direct and indirect children
    /// following the standard fractal-heap row layout.
    fn read_indirect_block(
        &mut self,
        info: &mut HeapInfo,
        block_size: u64,
        hdr_flags: u8,
        depth: usize,
    ) -> Result<u64, H5Error> {
        let start = self.cur.pos;

        if self.opts.error_checking {
            let signature = self.cur.u32()?;
            let version = self.cur.u8()?;
            if signature != H5_FHIB_SIGNATURE_LE {
                return Err(H5Error::BadSignature("heap indirect block"));
            }
            if version != 0 {
                return Err(H5Error::Format(format!(
                    "unsupported indirect block version: {version}"
                )));
            }
        } else {
            self.cur.skip(5);
        }

        self.cur.skip(self.cur.ctx().offset_size as u64);
        self.cur.skip(info.blk_offset_size);

        // The root indirect block takes its row count from the heap header;
        // nested ones derive it from their block size.
        let mut nrows = info.curr_num_rows;
        let curr_size = info.starting_blk_size * info.table_width;
        if block_size > 0 {
            nrows = highest_bit(block_size) - highest_bit(curr_size) + 1;
        }
        let max_dblock_rows =
            highest_bit(info.max_dblk_size) - highest_bit(info.starting_blk_size) + 2;
        let k = (nrows.min(max_dblock_rows) * info.table_width) as i64;
        let n = k - (max_dblock_rows * info.table_width) as i64;

        for row in 0..nrows {
            let row_size = row_block_size(row, info.starting_blk_size);
            for _entry in 0..info.table_width {
                if row_size <= info.max_dblk_size {
                    if self.opts.error_checking && row as i64 >= k {
                        return Err(H5Error::Format(format!(
                            "unexpected direct block row: {row_size}, {row} >= {k}"
                        )));
                    }
                    let direct_block_addr = self.cur.offset()?;
                    if !self.cur.is_undef(direct_block_addr) && !self.found {
                        let return_pos = self.cur.pos;
                        self.cur.seek(direct_block_addr);
                        let bytes_read =
                            self.read_direct_block(info, row_size, hdr_flags, depth)?;
                        self.cur.seek(return_pos);
                        if self.opts.error_checking && bytes_read > row_size {
                            return Err(H5Error::Format(format!(
                                "direct block contained more bytes than specified: \
                                 {bytes_read} > {row_size}"
                            )));
                        }
                    }
                } else if self.opts.error_checking
                    && ((row as i64) < k || (row as i64) >= n)
                {
                    return Err(H5Error::Format(format!(
                        "unexpected indirect block row: {row_size}, {row}, {n}"
                    )));
                } else {
                    let indirect_block_addr = self.cur.offset()?;
                    if !self.cur.is_undef(indirect_block_addr) && !self.found {
                        let return_pos = self.cur.pos;
                        self.cur.seek(indirect_block_addr);
                        let bytes_read =
                            self.read_indirect_block(info, row_size, hdr_flags, depth)?;
                        self.cur.seek(return_pos);
                        if self.opts.error_checking && bytes_read > row_size {
                            return Err(H5Error::Format(format!(
                                "indirect block contained more bytes than specified: \
                                 {bytes_read} > {row_size}"
                            )));
                        }
                    }
                }
            }
        }

        self.cur.skip(4); // checksum
        Ok(self.cur.pos - start)
    }
}
