use std::io::Read;

use log::trace;

use crate::error::H5Error;
use crate::h5::btree::{read_key, read_node_header};
use crate::h5::cursor::Cursor;
use crate::h5::superblock::FileContext;
use crate::hyperslice::Span;
use crate::io::Source;
use crate::meta::Metadata;

/// Reads the chunks of one dataset that intersect a normalized hyperslice,
/// walking the v1 B-tree rooted at the layout message's address and copying
/// each intersection into the output buffer in row-major N-D order.
pub struct ChunkReader<'a> {
    src: &'a Source,
    ctx: &'a FileContext,
    meta: &'a Metadata,
    slice: &'a [Span],
    shape: Vec<u64>,
    chunk_buf_size: u64,
    chunk_step: Vec<u64>,
    slice_chunk_start: u64,
    slice_chunk_end: u64,
    error_checking: bool,
    enable_fill: bool,
}

impl<'a> ChunkReader<'a> {
    pub fn new(
        src: &'a Source,
        ctx: &'a FileContext,
        meta: &'a Metadata,
        slice: &'a [Span],
        error_checking: bool,
        enable_fill: bool,
    ) -> Result<Self, H5Error> {
        let ndims = meta.ndims.unwrap_or(0);
        if ndims == 0 {
            return Err(H5Error::Format(
                "chunked read of a zero-dimensional dataset".into(),
            ));
        }
        if meta.chunk_dimensions.len() != ndims
            || meta.chunk_dimensions.iter().any(|&d| d == 0)
        {
            return Err(H5Error::Format(format!(
                "chunk dimensions {:?} are inconsistent with rank {ndims}",
                meta.chunk_dimensions
            )));
        }
        if error_checking {
            if meta.element_size as usize != meta.type_size {
                return Err(H5Error::Format(format!(
                    "chunk element size does not match data element size: {} != {}",
                    meta.element_size, meta.type_size
                )));
            }
            if meta.chunk_elements == 0 {
                return Err(H5Error::Format("invalid number of chunk elements: 0".into()));
            }
            if meta.filter.shuffle && !(1..=8).contains(&meta.type_size) {
                return Err(H5Error::Format(format!(
                    "invalid element size for shuffle: {}",
                    meta.type_size
                )));
            }
        }

        // Chunk-space geometry. A 12x12x12 dataset with 3x3x3 chunks has
        // 4x4x4 chunks and chunk step sizes 16,4,1: advancing one chunk in
        // dimension d sweeps chunk_step[d] linear chunk slots.
        let dims_in_chunks: Vec<u64> = (0..ndims)
            .map(|d| meta.dimensions[d] / meta.chunk_dimensions[d])
            .collect();
        let mut chunk_step = vec![1u64; ndims];
        for d in (1..ndims).rev() {
            chunk_step[d - 1] = dims_in_chunks[d] * chunk_step[d];
        }

        let slice_in_chunks: Vec<(u64, u64)> = (0..ndims)
            .map(|d| {
                (
                    slice[d].lo / meta.chunk_dimensions[d],
                    slice[d].hi / meta.chunk_dimensions[d],
                )
            })
            .collect();
        let slice_chunk_start = (0..ndims)
            .map(|d| slice_in_chunks[d].0 * chunk_step[d])
            .sum();
        let slice_chunk_end = (0..ndims)
            .map(|d| slice_in_chunks[d].1 * chunk_step[d])
            .sum();

        Ok(Self {
            src,
            ctx,
            meta,
            slice,
            shape: slice.iter().map(Span::len).collect(),
            chunk_buf_size: meta.chunk_elements * meta.type_size as u64,
            chunk_step,
            slice_chunk_start,
            slice_chunk_end,
            error_checking,
            enable_fill,
        })
    }

    /// Walk the chunk index and fill `out` (sized to the hyperslice).
    pub fn read_into(&self, out: &mut [u8]) -> Result<(), H5Error> {
        if self.enable_fill && !self.meta.fill_value.is_empty() {
            let fill = &self.meta.fill_value;
            for dst in out.chunks_mut(fill.len()) {
                dst.copy_from_slice(&fill[..dst.len()]);
            }
        }
        self.read_btree_node(self.meta.address, out)
    }

    fn read_btree_node(&self, pos: u64, out: &mut [u8]) -> Result<(), H5Error> {
        let ndims = self.meta.dimensions.len();
        let mut cur = Cursor::new(self.src, self.ctx, pos);
        let node = read_node_header(&mut cur, self.error_checking)?;

        let mut curr = read_key(&mut cur, ndims, self.meta.type_size, self.error_checking)?;
        for _ in 0..node.entries_used {
            let child_addr = cur.offset()?;
            let next = read_key(&mut cur, ndims, self.meta.type_size, self.error_checking)?;

            // Internal nodes cover [curr, next); leaves cover one chunk,
            // clipped to the dataset's dimensions.
            let node_slice: Vec<Span> = if node.level > 0 {
                (0..ndims)
                    .map(|d| Span::new(curr.offsets[d], next.offsets[d]))
                    .collect()
            } else {
                (0..ndims)
                    .map(|d| {
                        Span::new(
                            curr.offsets[d],
                            (curr.offsets[d] + self.meta.chunk_dimensions[d])
                                .min(self.meta.dimensions[d]),
                        )
                    })
                    .collect()
            };

            // Keys are ordered; once a 1-D node starts past the selection,
            // nothing further can intersect.
            if ndims <= 1 && self.slice[0].hi < node_slice[0].lo {
                break;
            }

            if self.intersects(&node_slice, node.level) {
                trace!(
                    "chunk entry level={} slice={node_slice:?} addr={child_addr:#x}",
                    node.level
                );
                if node.level > 0 {
                    self.read_btree_node(child_addr, out)?;
                } else if ndims == 1 {
                    self.copy_chunk_1d(&curr, child_addr, out)?;
                } else {
                    self.copy_chunk_nd(&curr, &node_slice, child_addr, out)?;
                }
            }

            curr = next;
        }
        Ok(())
    }

    /// Leaf intersection is per-dimension interval overlap; internal nodes
    /// compare linear chunk indices against the selection's chunk range.
    fn intersects(&self, node_slice: &[Span], level: u8) -> bool {
        let ndims = node_slice.len();
        if level == 0 {
            for d in 0..ndims {
                if node_slice[d].hi < self.slice[d].lo || node_slice[d].lo >= self.slice[d].hi {
                    return false;
                }
            }
            true
        } else {
            let node_start: u64 = (0..ndims)
                .map(|d| node_slice[d].lo / self.meta.chunk_dimensions[d] * self.chunk_step[d])
                .sum();
            let node_end: u64 = (0..ndims)
                .map(|d| node_slice[d].hi / self.meta.chunk_dimensions[d] * self.chunk_step[d])
                .sum();
            !(node_end < self.slice_chunk_start || node_start > self.slice_chunk_end)
        }
    }

    fn inflate_chunk(&self, raw: &[u8]) -> Result<Vec<u8>, H5Error> {
        let mut out = Vec::with_capacity(self.chunk_buf_size as usize);
        let mut decoder = flate2::read::ZlibDecoder::new(raw);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| H5Error::Format(format!("deflate chunk failed to inflate: {e}")))?;
        if self.error_checking && out.len() as u64 != self.chunk_buf_size {
            return Err(H5Error::Format(format!(
                "inflated chunk is {} bytes, expected {}",
                out.len(),
                self.chunk_buf_size
            )));
        }
        Ok(out)
    }

    fn copy_chunk_1d(
        &self,
        key: &crate::h5::btree::ChunkKey,
        child_addr: u64,
        out: &mut [u8],
    ) -> Result<(), H5Error> {
        let type_size = self.meta.type_size as u64;
        let chunk_buf_size = self.chunk_buf_size;

        let buffer_offset = type_size * self.slice[0].lo;
        let chunk_offset = key.offsets[0] * type_size;

        // Destination offset within the output buffer.
        let mut buffer_index = 0u64;
        if chunk_offset > buffer_offset {
            buffer_index = chunk_offset - buffer_offset;
            if buffer_index >= out.len() as u64 {
                return Err(H5Error::Format(format!(
                    "invalid location to read data: {chunk_offset}, {buffer_offset}"
                )));
            }
        }
        // Source offset within the chunk.
        let mut chunk_index = 0u64;
        if buffer_offset > chunk_offset {
            chunk_index = buffer_offset - chunk_offset;
            if chunk_index >= chunk_buf_size {
                return Err(H5Error::Format(format!(
                    "invalid location to read chunk: {chunk_offset}, {buffer_offset}"
                )));
            }
        }
        // Bytes to copy, clipped to the output buffer.
        let mut chunk_bytes = chunk_buf_size - chunk_index;
        if buffer_index + chunk_bytes > out.len() as u64 {
            chunk_bytes = out.len() as u64 - buffer_index;
        }

        let bi = buffer_index as usize;
        let ci = chunk_index as usize;
        let cb = chunk_bytes as usize;

        if self.meta.filter.deflate {
            let raw = self.src.read_direct(child_addr, key.chunk_size as usize)?;
            if chunk_bytes == chunk_buf_size && !self.meta.filter.shuffle {
                // Whole chunk lands contiguously: inflate straight into the
                // destination slice.
                let inflated = self.inflate_chunk(&raw)?;
                out[bi..bi + cb].copy_from_slice(&inflated[..cb]);
            } else {
                let inflated = self.inflate_chunk(&raw)?;
                if self.meta.filter.shuffle {
                    let restored = unshuffle(&inflated, ci, cb, self.meta.type_size);
                    out[bi..bi + cb].copy_from_slice(&restored);
                } else {
                    out[bi..bi + cb].copy_from_slice(&inflated[ci..ci + cb]);
                }
            }
        } else if self.error_checking && self.meta.filter.shuffle {
            return Err(H5Error::Unsupported(
                "shuffle filter on an uncompressed chunk".into(),
            ));
        } else if self.error_checking && chunk_buf_size != key.chunk_size {
            return Err(H5Error::Format(format!(
                "mismatch in chunk size: {} != {chunk_buf_size}",
                key.chunk_size
            )));
        } else {
            // No filters: read only the bytes the selection needs.
            let raw = self.src.read_direct(child_addr + chunk_index, cb)?;
            out[bi..bi + cb].copy_from_slice(&raw);
        }
        Ok(())
    }

    fn copy_chunk_nd(
        &self,
        key: &crate::h5::btree::ChunkKey,
        node_slice: &[Span],
        child_addr: u64,
        out: &mut [u8],
    ) -> Result<(), H5Error> {
        let ndims = node_slice.len();

        let raw = self.src.read_direct(child_addr, key.chunk_size as usize)?;
        let chunk_buffer = if self.meta.filter.deflate {
            let mut inflated = self.inflate_chunk(&raw)?;
            if self.meta.filter.shuffle {
                inflated = unshuffle(
                    &inflated,
                    0,
                    self.chunk_buf_size as usize,
                    self.meta.type_size,
                );
            }
            inflated
        } else if self.error_checking && self.meta.filter.shuffle {
            return Err(H5Error::Unsupported(
                "shuffle filter on an uncompressed chunk".into(),
            ));
        } else if self.error_checking && self.chunk_buf_size != key.chunk_size {
            return Err(H5Error::Format(format!(
                "mismatch in chunk size: {} != {}",
                key.chunk_size, self.chunk_buf_size
            )));
        } else {
            raw
        };

        // Intersection of the chunk's slice with the selection, expressed
        // in chunk-local and output-local coordinates.
        let subset: Vec<Span> = (0..ndims)
            .map(|d| {
                Span::new(
                    node_slice[d].lo.max(self.slice[d].lo),
                    node_slice[d].hi.min(self.slice[d].hi),
                )
            })
            .collect();
        let read_slice: Vec<Span> = (0..ndims)
            .map(|d| {
                let lo = subset[d].lo - node_slice[d].lo;
                Span::new(lo, lo + subset[d].len())
            })
            .collect();
        let write_slice: Vec<Span> = (0..ndims)
            .map(|d| {
                let lo = subset[d].lo - self.slice[d].lo;
                Span::new(lo, lo + subset[d].len())
            })
            .collect();

        copy_slice(
            out,
            &self.shape,
            &write_slice,
            &chunk_buffer,
            &self.meta.chunk_dimensions,
            &read_slice,
            self.meta.type_size,
        );
        Ok(())
    }
}

/// Undo the shuffle filter for `output_size / type_size` elements starting
/// at element `output_offset / type_size`. The shuffled form stores byte 0
/// of every element first, then byte 1, and so on:
/// `out[i*T + b] = input[b*N + i]` for N elements of T bytes.
pub(crate) fn unshuffle(
    input: &[u8],
    output_offset: usize,
    output_size: usize,
    type_size: usize,
) -> Vec<u8> {
    let mut out = vec![0u8; output_size];
    let elements_in_chunk = input.len() / type_size;
    let elements_to_restore = output_size / type_size;
    let start_element = output_offset / type_size;
    let mut dst = 0;
    for element in start_element..start_element + elements_to_restore {
        for byte in 0..type_size {
            out[dst] = input[byte * elements_in_chunk + element];
            dst += 1;
        }
    }
    out
}

/// Copy a source sub-rectangle into a destination sub-rectangle of equal
/// extents. Both buffers are row-major; the innermost dimension is copied
/// as one contiguous run per sweep, outer indices carry-increment.
pub(crate) fn copy_slice(
    dst: &mut [u8],
    dst_dims: &[u64],
    dst_slice: &[Span],
    src: &[u8],
    src_dims: &[u64],
    src_slice: &[Span],
    type_size: usize,
) {
    let ndims = src_dims.len();
    if src_slice.iter().any(Span::is_empty) {
        return;
    }

    // Byte strides per dimension, row-major.
    let mut src_step = vec![type_size as u64; ndims];
    let mut dst_step = vec![type_size as u64; ndims];
    for d in (1..ndims).rev() {
        src_step[d - 1] = src_dims[d] * src_step[d];
        dst_step[d - 1] = dst_dims[d] * dst_step[d];
    }

    let mut src_index: Vec<u64> = src_slice.iter().map(|s| s.lo).collect();
    let mut dst_index: Vec<u64> = dst_slice.iter().map(|s| s.lo).collect();

    let run = src_slice[ndims - 1].len();
    let read_size = (src_step[ndims - 1] * run) as usize;

    while src_index[0] < src_slice[0].hi {
        let src_offset: u64 = (0..ndims).map(|d| src_index[d] * src_step[d]).sum();
        let dst_offset: u64 = (0..ndims).map(|d| dst_index[d] * dst_step[d]).sum();
        dst[dst_offset as usize..dst_offset as usize + read_size]
            .copy_from_slice(&src[src_offset as usize..src_offset as usize + read_size]);

        // Advance the innermost index by one run, carrying into outer
        // dimensions as each slice is exhausted.
        src_index[ndims - 1] += run;
        let mut i = ndims - 1;
        while i > 0 && src_index[i] == src_slice[i].hi {
            src_index[i] = src_slice[i].lo;
            src_index[i - 1] += 1;
            i -= 1;
        }
        dst_index[ndims - 1] += run;
        let mut i = ndims - 1;
        while i > 0 && dst_index[i] == dst_slice[i].hi {
            dst_index[i] = dst_slice[i].lo;
            dst_index[i - 1] += 1;
            i -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn shuffle(input: &[u8], type_size: usize) -> Vec<u8> {
        let elements = input.len() / type_size;
        let mut out = vec![0u8; input.len()];
        for i in 0..elements {
            for b in 0..type_size {
                out[b * elements + i] = input[i * type_size + b];
            }
        }
        out
    }

    #[test]
    fn unshuffle_restores_element_order() {
        let data: Vec<u8> = (0u8..32).collect();
        for type_size in [1usize, 2, 4, 8] {
            let shuffled = shuffle(&data, type_size);
            let restored = unshuffle(&shuffled, 0, data.len(), type_size);
            assert_eq!(restored, data, "type_size={type_size}");
        }
    }

    #[test]
    fn unshuffle_with_offset_restores_a_suffix() {
        let data: Vec<u8> = (0u8..24).collect();
        let shuffled = shuffle(&data, 4);
        // Restore elements 2.. (offset 8 bytes, 16 bytes out).
        let restored = unshuffle(&shuffled, 8, 16, 4);
        assert_eq!(restored, &data[8..24]);
    }

    #[test]
    fn copy_slice_extracts_a_2d_window() {
        // 4x4 source of bytes 0..16, copy rows 1..3 x cols 1..3 into a 2x2
        // destination.
        let src: Vec<u8> = (0u8..16).collect();
        let mut dst = vec![0u8; 4];
        copy_slice(
            &mut dst,
            &[2, 2],
            &[Span::new(0, 2), Span::new(0, 2)],
            &src,
            &[4, 4],
            &[Span::new(1, 3), Span::new(1, 3)],
            1,
        );
        assert_eq!(dst, vec![5, 6, 9, 10]);
    }

    #[test]
    fn copy_slice_places_a_window_inside_a_larger_destination() {
        // Write a 2x2 source block into the middle of a 3x3 destination.
        let src: Vec<u8> = vec![1, 2, 3, 4];
        let mut dst = vec![0u8; 9];
        copy_slice(
            &mut dst,
            &[3, 3],
            &[Span::new(1, 3), Span::new(1, 3)],
            &src,
            &[2, 2],
            &[Span::new(0, 2), Span::new(0, 2)],
            1,
        );
        assert_eq!(dst, vec![0, 0, 0, 0, 1, 2, 0, 3, 4]);
    }

    #[test]
    fn copy_slice_handles_3d_and_wider_elements() {
        // 2x2x2 source of u16 elements, full copy.
        let src: Vec<u8> = (0u8..16).collect();
        let mut dst = vec![0u8; 16];
        let full = [Span::new(0, 2), Span::new(0, 2), Span::new(0, 2)];
        copy_slice(&mut dst, &[2, 2, 2], &full, &src, &[2, 2, 2], &full, 2);
        assert_eq!(dst, src);
    }

    #[test]
    fn copy_slice_ignores_empty_selections() {
        let src: Vec<u8> = (0u8..16).collect();
        let mut dst = vec![7u8; 4];
        copy_slice(
            &mut dst,
            &[2, 2],
            &[Span::new(0, 0), Span::new(0, 2)],
            &src,
            &[4, 4],
            &[Span::new(1, 1), Span::new(1, 3)],
            1,
        );
        assert_eq!(dst, vec![7; 4]);
    }

    #[test]
    fn inflate_roundtrips_flate2_output() {
        let payload: Vec<u8> = (0..64u8).collect();
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut out = Vec::new();
        let mut decoder = flate2::read::ZlibDecoder::new(&compressed[..]);
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }
}
