//! Minimal HDF5 image writer used by the integration tests.
//!
//! Builds self-contained little-endian HDF5 files covering the structures
//! the reader supports: superblock v0, v1 object headers reached through
//! symbol tables, v0 ("OHDR") object headers reached through fractal-heap
//! links and continuation blocks, contiguous/compact/chunked layouts, a v1
//! chunk B-tree, deflate/shuffle filters, fill values and attributes.

// Each test binary compiles its own copy and uses a different subset.
#![allow(dead_code)]

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;

pub const UNDEF: u64 = u64::MAX;

/// An HDF5 file image under construction. The first 96 bytes are reserved
/// for the version-0 superblock, patched in by `finish`.
pub struct Image {
    buf: Vec<u8>,
}

impl Image {
    pub fn new() -> Self {
        Self { buf: vec![0u8; 96] }
    }

    pub fn append(&mut self, bytes: &[u8]) -> u64 {
        let at = self.buf.len() as u64;
        self.buf.extend_from_slice(bytes);
        at
    }

    /// Patch in a version-2 superblock instead (same 96-byte reservation;
    /// the tail of the reservation stays zero).
    pub fn finish_v2(mut self, root_addr: u64) -> Vec<u8> {
        let eof = self.buf.len() as u64;
        let mut sb = Vec::with_capacity(48);
        sb.extend_from_slice(b"\x89HDF\r\n\x1a\n");
        sb.push(2); // superblock version
        sb.push(8); // offset size
        sb.push(8); // length size
        sb.push(0); // consistency flags
        sb.extend_from_slice(&0u64.to_le_bytes()); // base address
        sb.extend_from_slice(&UNDEF.to_le_bytes()); // extension address
        sb.extend_from_slice(&eof.to_le_bytes()); // end of file
        sb.extend_from_slice(&root_addr.to_le_bytes()); // root header address
        sb.extend_from_slice(&0u32.to_le_bytes()); // checksum
        self.buf[..sb.len()].copy_from_slice(&sb);
        self.buf
    }

    pub fn finish(mut self, root_addr: u64) -> Vec<u8> {
        let eof = self.buf.len() as u64;
        let mut sb = Vec::with_capacity(96);
        sb.extend_from_slice(b"\x89HDF\r\n\x1a\n");
        sb.extend_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0]);
        sb.extend_from_slice(&4u16.to_le_bytes()); // group leaf k
        sb.extend_from_slice(&16u16.to_le_bytes()); // group internal k
        sb.extend_from_slice(&0u32.to_le_bytes()); // consistency flags
        sb.extend_from_slice(&0u64.to_le_bytes()); // base address
        sb.extend_from_slice(&UNDEF.to_le_bytes()); // free space address
        sb.extend_from_slice(&eof.to_le_bytes()); // end of file
        sb.extend_from_slice(&UNDEF.to_le_bytes()); // driver info
        sb.extend_from_slice(&0u64.to_le_bytes()); // root link name offset
        sb.extend_from_slice(&root_addr.to_le_bytes()); // root header address
        sb.extend_from_slice(&0u32.to_le_bytes()); // cache type
        sb.extend_from_slice(&0u32.to_le_bytes()); // reserved
        sb.extend_from_slice(&[0u8; 16]); // scratch pad
        assert_eq!(sb.len(), 96);
        self.buf[..96].copy_from_slice(&sb);
        self.buf
    }
}

fn pad8(buf: &mut Vec<u8>) {
    while buf.len() % 8 != 0 {
        buf.push(0);
    }
}

fn padded8(bytes: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    pad8(&mut out);
    out
}

// ---- header message bodies ----

/// Dataspace message, version 1 (no max dimensions).
pub fn dataspace(dims: &[u64]) -> Vec<u8> {
    let mut b = vec![1, dims.len() as u8, 0, 0, 0, 0, 0, 0];
    for d in dims {
        b.extend_from_slice(&d.to_le_bytes());
    }
    b
}

/// Fixed-point datatype message, version 1.
pub fn dtype_fixed(size: u32, signed: bool) -> Vec<u8> {
    let bits = if signed { 0x08u8 } else { 0x00 };
    let mut b = vec![0x10, bits, 0, 0];
    b.extend_from_slice(&size.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes()); // bit offset
    b.extend_from_slice(&((size * 8) as u16).to_le_bytes()); // bit precision
    b
}

/// IEEE floating-point datatype message, version 1.
pub fn dtype_float(size: u32) -> Vec<u8> {
    let mut b = vec![0x11, 0x20, 0x3F, 0x00];
    b.extend_from_slice(&size.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes()); // bit offset
    b.extend_from_slice(&((size * 8) as u16).to_le_bytes()); // bit precision
    if size == 4 {
        b.extend_from_slice(&[23, 8, 0, 23]);
        b.extend_from_slice(&127u32.to_le_bytes());
    } else {
        b.extend_from_slice(&[52, 11, 0, 52]);
        b.extend_from_slice(&1023u32.to_le_bytes());
    }
    b
}

/// Fixed-length ASCII string datatype message.
pub fn dtype_string(size: u32) -> Vec<u8> {
    let mut b = vec![0x13, 0x00, 0, 0];
    b.extend_from_slice(&size.to_le_bytes());
    b
}

/// Fill value message, version 2.
pub fn fill_value(fill: Option<&[u8]>) -> Vec<u8> {
    match fill {
        Some(f) => {
            let mut b = vec![2, 2, 0, 1];
            b.extend_from_slice(&(f.len() as u32).to_le_bytes());
            b.extend_from_slice(f);
            b
        }
        None => vec![2, 2, 0, 0],
    }
}

pub fn layout_contiguous(addr: u64, size: u64) -> Vec<u8> {
    let mut b = vec![3, 1];
    b.extend_from_slice(&addr.to_le_bytes());
    b.extend_from_slice(&size.to_le_bytes());
    b
}

pub fn layout_compact(payload: &[u8]) -> Vec<u8> {
    let mut b = vec![3, 0];
    b.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    b.extend_from_slice(payload);
    b
}

pub fn layout_chunked(btree_addr: u64, chunk_dims: &[u32], elem_size: u32) -> Vec<u8> {
    let mut b = vec![3, 2, (chunk_dims.len() + 1) as u8];
    b.extend_from_slice(&btree_addr.to_le_bytes());
    for d in chunk_dims {
        b.extend_from_slice(&d.to_le_bytes());
    }
    b.extend_from_slice(&elem_size.to_le_bytes());
    b
}

/// Filter pipeline message, version 1. Shuffle is listed before deflate,
/// matching write-side application order.
pub fn filter_pipeline(deflate: bool, shuffle: bool) -> Vec<u8> {
    let mut filters: Vec<(u16, u32)> = Vec::new();
    if shuffle {
        filters.push((2, 4));
    }
    if deflate {
        filters.push((1, 6));
    }
    let mut b = vec![1, filters.len() as u8, 0, 0, 0, 0, 0, 0];
    for (id, param) in &filters {
        b.extend_from_slice(&id.to_le_bytes());
        b.extend_from_slice(&0u16.to_le_bytes()); // name length
        b.extend_from_slice(&1u16.to_le_bytes()); // flags: optional
        b.extend_from_slice(&1u16.to_le_bytes()); // one client value
        b.extend_from_slice(&param.to_le_bytes());
        b.extend_from_slice(&[0u8; 4]); // pad for odd parameter count
    }
    b
}

/// Attribute message, version 1 (name/datatype/dataspace padded to 8).
pub fn attribute_v1(name: &str, dtype: &[u8], dspace: &[u8], data: &[u8]) -> Vec<u8> {
    let mut name_z = name.as_bytes().to_vec();
    name_z.push(0);
    let mut b = vec![1, 0];
    b.extend_from_slice(&(name_z.len() as u16).to_le_bytes());
    b.extend_from_slice(&(dtype.len() as u16).to_le_bytes());
    b.extend_from_slice(&(dspace.len() as u16).to_le_bytes());
    b.extend_from_slice(&padded8(&name_z));
    b.extend_from_slice(&padded8(dtype));
    b.extend_from_slice(&padded8(dspace));
    b.extend_from_slice(data);
    b
}

/// Attribute message, version 3 (nothing padded, ASCII name encoding).
pub fn attribute_v3(name: &str, dtype: &[u8], dspace: &[u8], data: &[u8]) -> Vec<u8> {
    let mut name_z = name.as_bytes().to_vec();
    name_z.push(0);
    let mut b = vec![3, 0];
    b.extend_from_slice(&(name_z.len() as u16).to_le_bytes());
    b.extend_from_slice(&(dtype.len() as u16).to_le_bytes());
    b.extend_from_slice(&(dspace.len() as u16).to_le_bytes());
    b.push(0); // ASCII
    b.extend_from_slice(&name_z);
    b.extend_from_slice(dtype);
    b.extend_from_slice(dspace);
    b.extend_from_slice(data);
    b
}

pub fn symbol_table_msg(btree_addr: u64, heap_addr: u64) -> Vec<u8> {
    let mut b = Vec::with_capacity(16);
    b.extend_from_slice(&btree_addr.to_le_bytes());
    b.extend_from_slice(&heap_addr.to_le_bytes());
    b
}

/// Hard link message, version 1 (flags 0: one-byte name length).
pub fn link_hard(name: &str, addr: u64) -> Vec<u8> {
    let mut b = vec![1, 0, name.len() as u8];
    b.extend_from_slice(name.as_bytes());
    b.extend_from_slice(&addr.to_le_bytes());
    b
}

/// Link info message pointing at a fractal heap.
pub fn link_info(heap_addr: u64) -> Vec<u8> {
    let mut b = vec![0, 0];
    b.extend_from_slice(&heap_addr.to_le_bytes());
    b.extend_from_slice(&UNDEF.to_le_bytes()); // name index
    b
}

pub fn continuation(offset: u64, length: u64) -> Vec<u8> {
    let mut b = Vec::with_capacity(16);
    b.extend_from_slice(&offset.to_le_bytes());
    b.extend_from_slice(&length.to_le_bytes());
    b
}

/// Object modification time message (type 0x12); the reader skips it.
pub fn mod_time(seconds: u32) -> Vec<u8> {
    let mut b = vec![1, 0, 0, 0];
    b.extend_from_slice(&seconds.to_le_bytes());
    b
}

// ---- object headers ----

/// Version-1 object header: messages framed as type(2) size(2) flags(1)
/// reserved(3), bodies padded to 8 bytes.
pub fn v1_header(msgs: &[(u16, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (msg_type, msg) in msgs {
        let padded_len = (msg.len() + 7) / 8 * 8;
        body.extend_from_slice(&msg_type.to_le_bytes());
        body.extend_from_slice(&(padded_len as u16).to_le_bytes());
        body.push(0); // message flags
        body.extend_from_slice(&[0u8; 3]); // reserved
        body.extend_from_slice(msg);
        body.resize(body.len() + (padded_len - msg.len()), 0);
    }
    let mut h = vec![1u8, 0];
    h.extend_from_slice(&(msgs.len() as u16).to_le_bytes());
    h.extend_from_slice(&1u32.to_le_bytes()); // reference count
    h.extend_from_slice(&(body.len() as u32).to_le_bytes());
    h.extend_from_slice(&0u32.to_le_bytes()); // pad to 8-byte alignment
    h.extend_from_slice(&body);
    h
}

/// Version-0 ("OHDR") object header: messages framed as type(1) size(2)
/// flags(1), unpadded bodies, 4-byte chunk-0 size, trailing checksum.
pub fn v0_header(msgs: &[(u8, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (msg_type, msg) in msgs {
        body.push(*msg_type);
        body.extend_from_slice(&(msg.len() as u16).to_le_bytes());
        body.push(0); // message flags
        body.extend_from_slice(msg);
    }
    let mut h = b"OHDR".to_vec();
    h.push(2); // object header version
    h.push(0x02); // flags: 4-byte size-of-chunk-0
    h.extend_from_slice(&(body.len() as u32).to_le_bytes());
    h.extend_from_slice(&body);
    h.extend_from_slice(&0u32.to_le_bytes()); // checksum (not verified)
    h
}

/// Continuation block for v0 headers: OCHK signature, messages, checksum.
pub fn ochk_block(msgs: &[(u8, Vec<u8>)]) -> Vec<u8> {
    let mut b = b"OCHK".to_vec();
    for (msg_type, msg) in msgs {
        b.push(*msg_type);
        b.extend_from_slice(&(msg.len() as u16).to_le_bytes());
        b.push(0);
        b.extend_from_slice(msg);
    }
    b.extend_from_slice(&0u32.to_le_bytes()); // checksum
    b
}

// ---- group plumbing: local heap, SNOD, group B-tree ----

/// Append a local heap (data segment then header); returns the heap header
/// address and the name offsets within the data segment.
pub fn local_heap(img: &mut Image, names: &[&str]) -> (u64, Vec<u64>) {
    let mut data = vec![0u8; 8]; // free-list slot; names start past it
    let mut offsets = Vec::with_capacity(names.len());
    for name in names {
        offsets.push(data.len() as u64);
        data.extend_from_slice(name.as_bytes());
        data.push(0);
    }
    pad8(&mut data);
    let data_addr = img.append(&data);

    let mut h = b"HEAP".to_vec();
    h.push(0); // version
    h.extend_from_slice(&[0u8; 3]);
    h.extend_from_slice(&(data.len() as u64).to_le_bytes());
    h.extend_from_slice(&UNDEF.to_le_bytes()); // free list offset
    h.extend_from_slice(&data_addr.to_le_bytes());
    (img.append(&h), offsets)
}

/// One SNOD node with the given (name offset, header address) entries.
pub fn snod(entries: &[(u64, u64)]) -> Vec<u8> {
    let mut b = b"SNOD".to_vec();
    b.push(1); // version
    b.push(0); // reserved
    b.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for (name_offset, hdr_addr) in entries {
        b.extend_from_slice(&name_offset.to_le_bytes());
        b.extend_from_slice(&hdr_addr.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes()); // cache type
        b.extend_from_slice(&0u32.to_le_bytes()); // reserved
        b.extend_from_slice(&[0u8; 16]); // scratch pad
    }
    b
}

/// Single-leaf group B-tree pointing at one SNOD node.
pub fn group_btree(img: &mut Image, snod_addr: u64) -> u64 {
    let mut b = b"TREE".to_vec();
    b.push(0); // node type: group
    b.push(0); // level
    b.extend_from_slice(&1u16.to_le_bytes());
    b.extend_from_slice(&UNDEF.to_le_bytes());
    b.extend_from_slice(&UNDEF.to_le_bytes());
    b.extend_from_slice(&0u64.to_le_bytes()); // key 0
    b.extend_from_slice(&snod_addr.to_le_bytes());
    b.extend_from_slice(&0u64.to_le_bytes()); // key 1
    img.append(&b)
}

/// Append a whole group: object header + heap + SNOD + B-tree. `children`
/// must be sorted by name. `extra_msgs` (e.g. attributes) follow the
/// symbol table message in the group's header.
pub fn group(img: &mut Image, children: &[(&str, u64)], extra_msgs: &[(u16, Vec<u8>)]) -> u64 {
    let names: Vec<&str> = children.iter().map(|(n, _)| *n).collect();
    let (heap_addr, offsets) = local_heap(img, &names);
    let entries: Vec<(u64, u64)> = children
        .iter()
        .zip(&offsets)
        .map(|((_, addr), &off)| (off, *addr))
        .collect();
    let snod_addr = img.append(&snod(&entries));
    let btree_addr = group_btree(img, snod_addr);

    let mut msgs = vec![(0x11u16, symbol_table_msg(btree_addr, heap_addr))];
    msgs.extend_from_slice(extra_msgs);
    img.append(&v1_header(&msgs))
}

// ---- chunk plumbing ----

/// Single-leaf v1 chunk B-tree. Each entry is (stored size, element
/// offsets, chunk address); `end_key` closes the key list.
pub fn chunk_btree(
    img: &mut Image,
    entries: &[(u32, Vec<u64>, u64)],
    end_key: &[u64],
) -> u64 {
    let mut b = b"TREE".to_vec();
    b.push(1); // node type: raw data chunk
    b.push(0); // level
    b.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    b.extend_from_slice(&UNDEF.to_le_bytes());
    b.extend_from_slice(&UNDEF.to_le_bytes());
    for (stored_size, offsets, addr) in entries {
        b.extend_from_slice(&stored_size.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes()); // filter mask
        for off in offsets {
            b.extend_from_slice(&off.to_le_bytes());
        }
        b.extend_from_slice(&0u64.to_le_bytes()); // trailing zero
        b.extend_from_slice(&addr.to_le_bytes());
    }
    b.extend_from_slice(&0u32.to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes());
    for off in end_key {
        b.extend_from_slice(&off.to_le_bytes());
    }
    b.extend_from_slice(&0u64.to_le_bytes());
    img.append(&b)
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Apply the shuffle filter: byte 0 of every element first, then byte 1...
pub fn shuffle(data: &[u8], type_size: usize) -> Vec<u8> {
    let elements = data.len() / type_size;
    let mut out = vec![0u8; data.len()];
    for i in 0..elements {
        for b in 0..type_size {
            out[b * elements + i] = data[i * type_size + b];
        }
    }
    out
}

// ---- fractal heap (single direct root block) ----

/// Append a fractal heap whose root is one direct block holding the given
/// raw messages (LINK messages, harvested by the reader). Returns the heap
/// header address.
pub fn fractal_heap(img: &mut Image, messages: &[Vec<u8>]) -> u64 {
    const BLOCK_SIZE: usize = 512;
    const MAX_HEAP_SIZE: u16 = 32; // bits; block offset width (32+7)/8 = 4

    let mut block = b"FHDB".to_vec();
    block.push(0); // version
    block.extend_from_slice(&0u64.to_le_bytes()); // heap header address
    block.extend_from_slice(&[0u8; 4]); // block offset
    for msg in messages {
        block.extend_from_slice(msg);
    }
    assert!(block.len() <= BLOCK_SIZE, "direct block overflow");
    block.resize(BLOCK_SIZE, 0);
    let block_addr = img.append(&block);

    let mut h = b"FRHP".to_vec();
    h.push(0); // version
    h.extend_from_slice(&8u16.to_le_bytes()); // heap ID length
    h.extend_from_slice(&0u16.to_le_bytes()); // I/O filter length
    h.push(0); // flags: no direct-block checksums
    h.extend_from_slice(&4096u32.to_le_bytes()); // max managed object size
    h.extend_from_slice(&0u64.to_le_bytes()); // next huge object id
    h.extend_from_slice(&UNDEF.to_le_bytes()); // huge object b-tree
    h.extend_from_slice(&0u64.to_le_bytes()); // free space
    h.extend_from_slice(&UNDEF.to_le_bytes()); // free space manager
    h.extend_from_slice(&(BLOCK_SIZE as u64).to_le_bytes()); // managed space
    h.extend_from_slice(&(BLOCK_SIZE as u64).to_le_bytes()); // allocated space
    h.extend_from_slice(&0u64.to_le_bytes()); // direct block iterator
    h.extend_from_slice(&(messages.len() as u64).to_le_bytes()); // managed objects
    h.extend_from_slice(&0u64.to_le_bytes()); // huge object size
    h.extend_from_slice(&0u64.to_le_bytes()); // huge objects
    h.extend_from_slice(&0u64.to_le_bytes()); // tiny object size
    h.extend_from_slice(&0u64.to_le_bytes()); // tiny objects
    h.extend_from_slice(&4u16.to_le_bytes()); // table width
    h.extend_from_slice(&(BLOCK_SIZE as u64).to_le_bytes()); // starting block size
    h.extend_from_slice(&1024u64.to_le_bytes()); // max direct block size
    h.extend_from_slice(&MAX_HEAP_SIZE.to_le_bytes()); // max heap size (bits)
    h.extend_from_slice(&0u16.to_le_bytes()); // starting rows
    h.extend_from_slice(&block_addr.to_le_bytes()); // root block
    h.extend_from_slice(&0u16.to_le_bytes()); // current rows: direct root
    h.extend_from_slice(&0u32.to_le_bytes()); // checksum
    img.append(&h)
}
