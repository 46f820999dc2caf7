use crate::error::H5Error;
use crate::h5::cursor::Cursor;

/// "TREE", little-endian. Shared by group B-trees (node type 0) and raw
/// data chunk B-trees (node type 1).
pub const H5_TREE_SIGNATURE_LE: u32 = 0x45455254;

/// Header of one v1 B-tree chunk-index node. The two sibling addresses are
/// consumed but not kept; traversal is strictly top-down.
pub(crate) struct NodeHeader {
    pub level: u8,
    pub entries_used: u16,
}

/// Parse a chunk B-tree node header at the cursor (node type must be 1)
/// and leave the cursor on the first key.
pub(crate) fn read_node_header(
    cur: &mut Cursor<'_>,
    error_checking: bool,
) -> Result<NodeHeader, H5Error> {
    if error_checking {
        let signature = cur.u32()?;
        let node_type = cur.u8()?;
        if signature != H5_TREE_SIGNATURE_LE {
            return Err(H5Error::BadSignature("chunk b-tree"));
        }
        if node_type != 1 {
            return Err(H5Error::Format(format!(
                "expected raw data chunk b-tree, got node type {node_type}"
            )));
        }
    } else {
        cur.skip(5);
    }
    let level = cur.u8()?;
    let entries_used = cur.u16()?;
    cur.skip(2 * cur.ctx().offset_size as u64); // sibling addresses
    Ok(NodeHeader {
        level,
        entries_used,
    })
}

/// One key of the chunk index: stored chunk size, filter mask and the
/// chunk's N-D element offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChunkKey {
    pub chunk_size: u64,
    pub filter_mask: u32,
    pub offsets: Vec<u64>,
}

/// Read one key: `chunk_size(4) filter_mask(4) offsets[ndims]*8 zero(8)`.
pub(crate) fn read_key(
    cur: &mut Cursor<'_>,
    ndims: usize,
    type_size: usize,
    error_checking: bool,
) -> Result<ChunkKey, H5Error> {
    let chunk_size = cur.u32()? as u64;
    let filter_mask = cur.u32()?;
    let mut offsets = Vec::with_capacity(ndims);
    for _ in 0..ndims {
        offsets.push(cur.u64()?);
    }
    let trailing = cur.u64()?;
    if error_checking && type_size > 0 && trailing % type_size as u64 != 0 {
        return Err(H5Error::Format(format!(
            "chunk key missing trailing zero: {trailing}"
        )));
    }
    Ok(ChunkKey {
        chunk_size,
        filter_mask,
        offsets,
    })
}
