use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::H5Error;
use crate::h5::btree::H5_TREE_SIGNATURE_LE;
use crate::h5::cursor::Cursor;
use crate::h5::superblock::FileContext;
use crate::io::Source;
use crate::meta::{DataType, Layout, Metadata, Registry};

/// "OHDR", little-endian.
const H5_OHDR_SIGNATURE_LE: u32 = 0x5244484F;
/// "OCHK", little-endian.
const H5_OCHK_SIGNATURE_LE: u32 = 0x4B48434F;
/// "HEAP", little-endian.
const H5_HEAP_SIGNATURE_LE: u32 = 0x50414548;
/// "SNOD", little-endian.
const H5_SNOD_SIGNATURE_LE: u32 = 0x444F4E53;

// Header message type tags.
pub(crate) const DATASPACE_MSG: u16 = 0x1;
pub(crate) const LINK_INFO_MSG: u16 = 0x2;
pub(crate) const DATATYPE_MSG: u16 = 0x3;
pub(crate) const FILL_VALUE_MSG: u16 = 0x5;
pub(crate) const LINK_MSG: u16 = 0x6;
pub(crate) const DATA_LAYOUT_MSG: u16 = 0x8;
pub(crate) const FILTER_MSG: u16 = 0xB;
pub(crate) const ATTRIBUTE_MSG: u16 = 0xC;
pub(crate) const HEADER_CONT_MSG: u16 = 0x10;
pub(crate) const SYMBOL_TABLE_MSG: u16 = 0x11;
pub(crate) const ATTRIBUTE_INFO_MSG: u16 = 0x15;

/// Synthetic header flag marking v1 framing, so continuation blocks know
/// which message framing to use. Real v0 flag bits stay below 0x40.
pub(crate) const V1_FRAMING_FLAG: u8 = 0x80;

fn pad8(n: u64) -> u64 {
    (8 - (n % 8)) % 8
}

/// Knobs for one metadata walk.
#[derive(Debug, Clone, Copy)]
pub struct WalkOptions {
    /// Stop traversing messages as soon as the full path is resolved.
    pub early_exit: bool,
    /// Parse attribute messages (and harvest attribute fractal heaps).
    pub enable_attributes: bool,
    /// Verify signatures, versions and size invariants. Disabling skips
    /// the checks; it never reinterprets data.
    pub error_checking: bool,
    /// Fail on unknown header message tags instead of skipping them.
    pub strict: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            early_exit: true,
            enable_attributes: true,
            error_checking: true,
            strict: false,
        }
    }
}

/// One walk of the object-header graph, resolving a single `/`-separated
/// dataset path (whose final component may name an attribute).
///
/// The walk starts at the deepest prefix of the path whose object-header
/// address is already registered, and registers every hard link, symbol
/// table entry and attribute it passes so later walks can skip ahead.
pub struct HeaderWalk<'a> {
    pub(crate) cur: Cursor<'a>,
    registry: &'a Mutex<Registry>,
    pub(crate) path: Vec<String>,
    pub(crate) opts: WalkOptions,
    pub(crate) found: bool,
    curr_hdr_pos: u64,
    pub(crate) meta: Metadata,
}

impl<'a> HeaderWalk<'a> {
    pub fn new(
        src: &'a Source,
        ctx: &'a FileContext,
        registry: &'a Mutex<Registry>,
        dataset: &str,
        opts: WalkOptions,
    ) -> Self {
        let path: Vec<String> = dataset
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            cur: Cursor::new(src, ctx, ctx.root_address),
            registry,
            path,
            opts,
            found: false,
            curr_hdr_pos: 0,
            meta: Metadata::default(),
        }
    }

    /// Walk from the root (or the deepest cached prefix) and return the
    /// metadata record accumulated for the path.
    pub fn resolve(mut self) -> Result<Metadata, H5Error> {
        self.read_obj_hdr(0)?;
        Ok(self.meta)
    }

    /// Parse the object header at the cursor. The byte at the header start
    /// disambiguates: a leading 1 is a v1 header, anything else must open
    /// the v0 ("OHDR") signature.
    pub(crate) fn read_obj_hdr(&mut self, depth: usize) -> Result<(), H5Error> {
        let mut depth = depth;
        {
            // Resume from the deepest known prefix of the path.
            let reg = self.registry.lock();
            for lvl in ((depth + 1)..=self.path.len()).rev() {
                let prefix = self.path[..lvl].join("/");
                if let Some(&addr) = reg.addresses.get(&prefix) {
                    self.cur.seek(addr);
                    depth = lvl;
                    break;
                }
            }
        }
        self.curr_hdr_pos = self.cur.pos;
        let version_peek = self.cur.peek(1)? as u8;
        if version_peek == 1 {
            self.read_obj_hdr_v1(depth)
        } else {
            self.read_obj_hdr_v0(depth)
        }
    }

    fn read_obj_hdr_v0(&mut self, depth: usize) -> Result<(), H5Error> {
        const FILE_STATS_BIT: u8 = 0x20;
        const STORE_CHANGE_PHASE_BIT: u8 = 0x10;
        const SIZE_OF_CHUNK_0_MASK: u8 = 0x3;

        debug!("object header v0 [{depth}] @{:#x}", self.cur.pos);
        if self.opts.error_checking {
            let signature = self.cur.u32()?;
            let version = self.cur.u8()?;
            if signature != H5_OHDR_SIGNATURE_LE {
                return Err(H5Error::BadSignature("v0 object header"));
            }
            if version != 2 {
                return Err(H5Error::Format(format!(
                    "unsupported object header version: {version}"
                )));
            }
        } else {
            self.cur.skip(5);
        }

        let hdr_flags = self.cur.u8()?;
        if hdr_flags & FILE_STATS_BIT != 0 {
            self.cur.skip(16); // access/mod/change/birth timestamps
        }
        if hdr_flags & STORE_CHANGE_PHASE_BIT != 0 {
            self.cur.skip(4); // compact/dense attribute thresholds
        }

        let size_of_chunk0 = self.cur.field(1 << (hdr_flags & SIZE_OF_CHUNK_0_MASK))?;
        let end_of_hdr = self.cur.pos + size_of_chunk0;
        self.read_messages_v0(end_of_hdr, hdr_flags, depth)?;

        self.cur.skip(4); // checksum
        Ok(())
    }

    pub(crate) fn read_messages_v0(
        &mut self,
        end_of_hdr: u64,
        hdr_flags: u8,
        depth: usize,
    ) -> Result<(), H5Error> {
        const ATTR_CREATION_TRACK_BIT: u8 = 0x4;

        while self.cur.pos < end_of_hdr {
            let msg_type = self.cur.u8()? as u16;
            let msg_size = self.cur.u16()?;
            let _msg_flags = self.cur.u8()?;
            if hdr_flags & ATTR_CREATION_TRACK_BIT != 0 {
                self.cur.skip(2); // creation order
            }

            let bytes_read = self.read_message(msg_type, msg_size, hdr_flags, depth)?;
            if self.opts.error_checking && bytes_read != msg_size as u64 {
                return Err(H5Error::Format(format!(
                    "v0 message of type {msg_type:#x} read {bytes_read} bytes, expected {msg_size}"
                )));
            }

            if self.opts.early_exit && self.found {
                self.cur.seek(end_of_hdr);
                break;
            }
        }

        if self.opts.error_checking && self.cur.pos > end_of_hdr {
            return Err(H5Error::Format(format!(
                "v0 messages overran header end: {:#x} > {end_of_hdr:#x}",
                self.cur.pos
            )));
        }
        Ok(())
    }

    fn read_obj_hdr_v1(&mut self, depth: usize) -> Result<(), H5Error> {
        debug!("object header v1 [{depth}] @{:#x}", self.cur.pos);
        self.cur.skip(2); // version and reserved
        self.cur.skip(6); // message count and reference count

        let obj_hdr_size = self.cur.length()?;
        let end_of_hdr = self.cur.pos + obj_hdr_size;
        self.read_messages_v1(end_of_hdr, V1_FRAMING_FLAG, depth)
    }

    pub(crate) fn read_messages_v1(
        &mut self,
        end_of_hdr: u64,
        hdr_flags: u8,
        depth: usize,
    ) -> Result<(), H5Error> {
        const SIZE_OF_V1_PREFIX: u64 = 8;

        while self.cur.pos < end_of_hdr.saturating_sub(SIZE_OF_V1_PREFIX) {
            let msg_type = self.cur.u16()?;
            let msg_size = self.cur.u16()?;
            let _msg_flags = self.cur.u8()?;
            if self.opts.error_checking {
                let reserved1 = self.cur.u8()?;
                let reserved2 = self.cur.u16()?;
                if reserved1 != 0 && reserved2 != 0 {
                    return Err(H5Error::Format(format!(
                        "invalid reserved message fields: {reserved1},{reserved2}"
                    )));
                }
            } else {
                self.cur.skip(3);
            }

            // v1 message bodies are padded to an 8-byte boundary.
            let mut bytes_read = self.read_message(msg_type, msg_size, hdr_flags, depth)?;
            let padding = pad8(bytes_read);
            self.cur.skip(padding);
            bytes_read += padding;
            if self.opts.error_checking && bytes_read != msg_size as u64 {
                return Err(H5Error::Format(format!(
                    "v1 message of type {msg_type:#x} read {bytes_read} bytes, expected {msg_size}"
                )));
            }

            if self.opts.early_exit && self.found {
                self.cur.seek(end_of_hdr);
                break;
            }
        }

        // Move past any gap shorter than a message prefix.
        if self.cur.pos < end_of_hdr {
            self.cur.seek(end_of_hdr);
        }
        Ok(())
    }

    /// Dispatch one header message. Returns the number of body bytes
    /// consumed (the cursor has advanced past them).
    pub(crate) fn read_message(
        &mut self,
        msg_type: u16,
        msg_size: u16,
        hdr_flags: u8,
        depth: usize,
    ) -> Result<u64, H5Error> {
        let start = self.cur.pos;
        match msg_type {
            DATASPACE_MSG => {
                let mut meta = std::mem::take(&mut self.meta);
                let result = self.dataspace_msg(&mut meta);
                self.meta = meta;
                result?;
            }
            LINK_INFO_MSG => self.linkinfo_msg(hdr_flags, depth)?,
            DATATYPE_MSG => {
                let mut meta = std::mem::take(&mut self.meta);
                let result = self.datatype_msg(msg_size, &mut meta);
                self.meta = meta;
                result?;
            }
            FILL_VALUE_MSG => self.fillvalue_msg()?,
            LINK_MSG => self.link_msg(depth)?,
            DATA_LAYOUT_MSG => self.datalayout_msg()?,
            FILTER_MSG => self.filter_msg()?,
            ATTRIBUTE_MSG if self.opts.enable_attributes => {
                self.attribute_msg(msg_size, depth)?
            }
            HEADER_CONT_MSG => self.headercont_msg(hdr_flags, depth)?,
            SYMBOL_TABLE_MSG => self.symboltable_msg(depth)?,
            ATTRIBUTE_INFO_MSG if self.opts.enable_attributes => {
                self.attributeinfo_msg(hdr_flags, depth)?
            }
            _ => {
                // Zero-length messages of a nonzero type mean the walk has
                // lost framing (usually missed padding); abort rather than
                // spin.
                if msg_type != 0 && msg_size == 0 {
                    return Err(H5Error::Format(format!(
                        "zero-length message of type {msg_type:#x} @{start:#x}"
                    )));
                }
                let known_but_disabled =
                    matches!(msg_type, ATTRIBUTE_MSG | ATTRIBUTE_INFO_MSG);
                if self.opts.strict && msg_type != 0 && !known_but_disabled {
                    return Err(H5Error::Unsupported(format!(
                        "header message type {msg_type:#x}"
                    )));
                }
                debug!("skipped message [{depth}] @{start:#x}: type={msg_type:#x} size={msg_size}");
                self.cur.skip(msg_size as u64);
            }
        }
        Ok(self.cur.pos - start)
    }

    // ---- 0x01: dataspace ----

    pub(crate) fn dataspace_msg(&mut self, meta: &mut Metadata) -> Result<(), H5Error> {
        const MAX_DIM_PRESENT: u8 = 0x1;
        const PERM_INDEX_PRESENT: u8 = 0x2;

        let version = self.cur.u8()?;
        let ndims = self.cur.u8()? as usize;
        let flags = self.cur.u8()?;
        // Version 1 carries 5 reserved bytes here, version 2 carries 1.
        self.cur.skip(if version == 1 { 5 } else { 1 });

        if self.opts.error_checking {
            if version != 1 && version != 2 {
                return Err(H5Error::Format(format!(
                    "unsupported dataspace version: {version}"
                )));
            }
            if flags & PERM_INDEX_PRESENT != 0 {
                return Err(H5Error::Unsupported("dataspace permutation indexes".into()));
            }
        }

        meta.ndims = Some(ndims);
        meta.dimensions = Vec::with_capacity(ndims);
        if ndims > 0 {
            for _ in 0..ndims {
                meta.dimensions.push(self.cur.length()?);
            }
            if flags & MAX_DIM_PRESENT != 0 {
                self.cur
                    .skip(ndims as u64 * self.cur.ctx().length_size as u64);
            }
        }
        Ok(())
    }

    // ---- 0x02: link info ----

    fn linkinfo_msg(&mut self, hdr_flags: u8, depth: usize) -> Result<(), H5Error> {
        const MAX_CREATE_PRESENT_BIT: u8 = 0x1;
        const CREATE_ORDER_PRESENT_BIT: u8 = 0x2;

        let version = self.cur.u8()?;
        let flags = self.cur.u8()?;
        if self.opts.error_checking && version != 0 {
            return Err(H5Error::Format(format!(
                "unsupported link info version: {version}"
            )));
        }

        if flags & MAX_CREATE_PRESENT_BIT != 0 {
            self.cur.skip(8);
        }
        let heap_address = self.cur.offset()?;
        let _name_index = self.cur.offset()?;
        if flags & CREATE_ORDER_PRESENT_BIT != 0 {
            self.cur.skip(self.cur.ctx().offset_size as u64);
        }

        if !self.cur.is_undef(heap_address) {
            let return_pos = self.cur.pos;
            self.cur.seek(heap_address);
            self.read_fractal_heap(LINK_MSG, hdr_flags, depth)?;
            self.cur.seek(return_pos);
        }
        Ok(())
    }

    // ---- 0x03: datatype ----

    pub(crate) fn datatype_msg(&mut self, msg_size: u16, meta: &mut Metadata) -> Result<(), H5Error> {
        let start = self.cur.pos;
        let version_class = self.cur.u32()?;
        meta.type_size = self.cur.u32()? as usize;
        let version = (version_class & 0xF0) >> 4;
        let databits = version_class >> 8;
        let class = (version_class & 0x0F) as u8;
        meta.signed = (databits >> 3) & 0x1 == 1;
        meta.datatype = DataType::from_class(class);

        if self.opts.error_checking && version != 1 {
            return Err(H5Error::Format(format!(
                "unsupported datatype version: {version}"
            )));
        }

        match meta.datatype {
            Some(DataType::FixedPoint) => {
                self.cur.skip(4); // bit offset, bit precision
            }
            Some(DataType::FloatingPoint) => {
                meta.signed = true;
                self.cur.skip(12); // bit layout, exponent/mantissa geometry
            }
            Some(DataType::String) => {
                meta.signed = true;
            }
            Some(DataType::VariableLength) => {
                // Descend into the base type; it overwrites class and size.
                self.datatype_msg(0, meta)?;
            }
            Some(DataType::Reference) => {
                meta.signed = true;
            }
            Some(
                DataType::Compound
                | DataType::Time
                | DataType::BitField
                | DataType::Opaque
                | DataType::Enumerated
                | DataType::Array,
            ) => {
                // Recognized but not unpacked; consume the remaining body.
                meta.signed = true;
                warn!("datatype class {class} is recognized but not unpacked");
                if msg_size > 0 {
                    self.cur.seek(start + msg_size as u64);
                }
            }
            None => {
                if self.opts.error_checking {
                    return Err(H5Error::Format(format!("unsupported datatype: {class}")));
                }
            }
        }
        Ok(())
    }

    // ---- 0x05: fill value ----

    fn fillvalue_msg(&mut self) -> Result<(), H5Error> {
        const FILL_VALUE_DEFINED: u8 = 0x20;

        let version = self.cur.u8()?;
        if self.opts.error_checking && version != 2 && version != 3 {
            return Err(H5Error::Format(format!(
                "invalid fill value version: {version}"
            )));
        }

        if version == 2 {
            self.cur.skip(2); // space allocation time, write time
            let fill_value_defined = self.cur.u8()?;
            if fill_value_defined != 0 {
                let fill_size = self.cur.u32()? as usize;
                if fill_size > 0 {
                    self.meta.fill_value = self.cur.bytes(fill_size.min(8))?;
                    if fill_size > 8 {
                        self.cur.skip(fill_size as u64 - 8);
                    }
                }
            }
        } else {
            let flags = self.cur.u8()?;
            if flags & FILL_VALUE_DEFINED != 0 {
                let fill_size = self.cur.u32()? as usize;
                self.meta.fill_value = self.cur.bytes(fill_size.min(8))?;
                if fill_size > 8 {
                    self.cur.skip(fill_size as u64 - 8);
                }
            }
        }
        Ok(())
    }

    // ---- 0x06: link ----

    fn link_msg(&mut self, depth: usize) -> Result<(), H5Error> {
        const SIZE_OF_LEN_OF_NAME_MASK: u8 = 0x03;
        const CREATE_ORDER_PRESENT_BIT: u8 = 0x04;
        const LINK_TYPE_PRESENT_BIT: u8 = 0x08;
        const CHAR_SET_PRESENT_BIT: u8 = 0x10;
        const HARD_LINK: u8 = 0;
        const SOFT_LINK: u8 = 1;
        const EXTERNAL_LINK: u8 = 64;

        let version = self.cur.u8()?;
        let flags = self.cur.u8()?;
        if self.opts.error_checking && version != 1 {
            return Err(H5Error::Format(format!(
                "unsupported link message version: {version}"
            )));
        }

        let mut link_type = HARD_LINK;
        if flags & LINK_TYPE_PRESENT_BIT != 0 {
            link_type = self.cur.u8()?;
        }
        if flags & CREATE_ORDER_PRESENT_BIT != 0 {
            self.cur.skip(8);
        }
        if flags & CHAR_SET_PRESENT_BIT != 0 {
            self.cur.skip(1);
        }

        let name_len_width = 1u8 << (flags & SIZE_OF_LEN_OF_NAME_MASK);
        let link_name_len = self.cur.field(name_len_width)? as usize;
        let link_name = String::from_utf8(self.cur.bytes(link_name_len)?)
            .map_err(|e| H5Error::Format(format!("bad utf-8 in link name: {e}")))?;
        debug!("link [{depth}]: {link_name} (type {link_type})");

        let follow_link = depth < self.path.len() && link_name == self.path[depth];

        match link_type {
            HARD_LINK => {
                let obj_hdr_addr = self.cur.offset()?;
                let group_path = self.child_path(depth, &link_name);
                self.registry.lock().addresses.insert(group_path, obj_hdr_addr);
                if follow_link {
                    let return_pos = self.cur.pos;
                    self.cur.seek(obj_hdr_addr);
                    self.read_obj_hdr(depth + 1)?;
                    self.cur.seek(return_pos);
                    if depth + 1 == self.path.len() {
                        self.found = true;
                    }
                }
            }
            SOFT_LINK => {
                let soft_len = self.cur.u16()? as usize;
                let target = self.cur.bytes(soft_len)?;
                if self.opts.error_checking && follow_link {
                    return Err(H5Error::Unsupported(format!(
                        "soft link traversal: {}",
                        String::from_utf8_lossy(&target)
                    )));
                }
            }
            EXTERNAL_LINK => {
                let ext_len = self.cur.u16()? as usize;
                let target = self.cur.bytes(ext_len)?;
                if self.opts.error_checking && follow_link {
                    return Err(H5Error::Unsupported(format!(
                        "external link traversal: {}",
                        String::from_utf8_lossy(&target)
                    )));
                }
            }
            other => {
                if self.opts.error_checking {
                    return Err(H5Error::Format(format!("unsupported link type: {other}")));
                }
            }
        }
        Ok(())
    }

    // ---- 0x08: data layout ----

    fn datalayout_msg(&mut self) -> Result<(), H5Error> {
        let version = self.cur.u8()?;
        let layout_class = self.cur.u8()?;
        if self.opts.error_checking && version != 3 {
            return Err(H5Error::Format(format!(
                "invalid data layout version: {version}"
            )));
        }

        match layout_class {
            0 => {
                self.meta.layout = Some(Layout::Compact);
                self.meta.size = self.cur.u16()? as u64;
                self.meta.address = self.cur.pos;
                self.cur.skip(self.meta.size);
            }
            1 => {
                self.meta.layout = Some(Layout::Contiguous);
                self.meta.address = self.cur.offset()?;
                self.meta.size = self.cur.length()?;
            }
            2 => {
                self.meta.layout = Some(Layout::Chunked);
                // The stored dimensionality is one more than the real count.
                let chunk_ndims = (self.cur.u8()? as usize).saturating_sub(1);
                if self.opts.error_checking
                    && self.meta.ndims.is_some_and(|n| n != chunk_ndims)
                {
                    return Err(H5Error::Format(format!(
                        "chunk dimensionality {chunk_ndims} does not match dataspace {:?}",
                        self.meta.ndims
                    )));
                }
                self.meta.address = self.cur.offset()?;
                if chunk_ndims > 0 {
                    self.meta.chunk_elements = 1;
                    for _ in 0..chunk_ndims {
                        let dim = self.cur.u32()? as u64;
                        self.meta.chunk_dimensions.push(dim);
                        self.meta.chunk_elements *= dim;
                    }
                }
                self.meta.element_size = self.cur.u32()? as u64;
            }
            other => {
                if self.opts.error_checking {
                    return Err(H5Error::Format(format!("unsupported data layout: {other}")));
                }
            }
        }
        Ok(())
    }

    // ---- 0x0B: filter pipeline ----

    fn filter_msg(&mut self) -> Result<(), H5Error> {
        let version = self.cur.u8()?;
        let num_filters = self.cur.u8()?;
        if self.opts.error_checking && version != 1 && version != 2 {
            return Err(H5Error::Format(format!("invalid filter version: {version}")));
        }
        if version == 1 {
            self.cur.skip(6); // reserved
        }

        for _ in 0..num_filters {
            let filter_id = self.cur.u16()?;
            let name_len = if version == 1 || filter_id >= 256 {
                self.cur.u16()? as u64
            } else {
                0
            };
            let flags = self.cur.u16()?;
            let num_params = self.cur.u16()? as u64;
            if self.opts.error_checking && flags != 0 && flags != 1 {
                return Err(H5Error::Format(format!(
                    "invalid flags in filter message: {flags}"
                )));
            }
            if name_len > 0 {
                self.cur.skip(name_len + pad8(name_len));
            }

            self.meta.filter.enable(filter_id)?;

            self.cur.skip(num_params * 4); // client data
            if version == 1 && num_params % 2 == 1 {
                self.cur.skip(4);
            }
        }
        Ok(())
    }

    // ---- 0x0C: attribute ----

    fn attribute_msg(&mut self, msg_size: u16, depth: usize) -> Result<(), H5Error> {
        let start = self.cur.pos;
        let version = self.cur.u8()?;
        let shared_flags = self.cur.u8()?;
        let name_size = self.cur.u16()? as u64;
        let mut datatype_size = self.cur.u16()? as u64;
        let mut dataspace_size = self.cur.u16()? as u64;

        if self.opts.error_checking {
            if !(1..=3).contains(&version) {
                return Err(H5Error::Format(format!(
                    "invalid attribute version: {version}"
                )));
            }
            if version != 1 && shared_flags != 0 {
                return Err(H5Error::Unsupported(format!(
                    "shared attribute messages: {shared_flags:#x}"
                )));
            }
        }

        if version == 3 {
            let encoding = self.cur.u8()?;
            if self.opts.error_checking && encoding > 1 {
                return Err(H5Error::Format(format!(
                    "invalid attribute name encoding: {encoding}"
                )));
            }
        }

        // Version 1 pads each sub-section to an 8-byte boundary.
        if version == 1 {
            datatype_size += pad8(datatype_size);
            dataspace_size += pad8(dataspace_size);
        }

        let raw_name = self.cur.bytes(name_size as usize)?;
        let attr_name: String = String::from_utf8_lossy(&raw_name)
            .trim_end_matches('\0')
            .to_string();
        if version == 1 {
            self.cur.skip(pad8(name_size));
        }
        debug!("attribute [{depth}]: {attr_name}");

        let mut attr_meta = Metadata::default();

        let dt_start = self.cur.pos;
        self.datatype_msg(datatype_size as u16, &mut attr_meta)?;
        let dt_read = self.cur.pos - dt_start;
        let dt_pad = if version == 1 { pad8(dt_read) } else { 0 };
        if self.opts.error_checking && dt_read + dt_pad != datatype_size {
            return Err(H5Error::Format(format!(
                "attribute datatype section read {dt_read} bytes, expected {datatype_size}"
            )));
        }
        self.cur.skip(dt_pad);

        let ds_start = self.cur.pos;
        self.dataspace_msg(&mut attr_meta)?;
        let ds_read = self.cur.pos - ds_start;
        let ds_pad = if version == 1 { pad8(ds_read) } else { 0 };
        if self.opts.error_checking && ds_read + ds_pad != dataspace_size {
            return Err(H5Error::Format(format!(
                "attribute dataspace section read {ds_read} bytes, expected {dataspace_size}"
            )));
        }
        self.cur.skip(ds_pad);

        // The payload sits inline; register it as a contiguous, unfiltered
        // record at the current offset.
        attr_meta.is_attribute = true;
        attr_meta.layout = Some(Layout::Contiguous);
        attr_meta.filter = Default::default();
        attr_meta.address = self.cur.pos;
        attr_meta.size = (msg_size as u64).saturating_sub(self.cur.pos - start);

        let attr_path = self.child_path(depth, &attr_name);
        {
            let mut reg = self.registry.lock();
            reg.metadata.insert(attr_path.clone(), attr_meta.clone());
            reg.addresses.insert(attr_path, self.curr_hdr_pos);
        }

        self.cur.skip(attr_meta.size);

        if depth + 1 == self.path.len() && attr_name == self.path[depth] {
            self.found = true;
            self.meta = attr_meta;
        }
        Ok(())
    }

    // ---- 0x10: header continuation ----

    fn headercont_msg(&mut self, hdr_flags: u8, depth: usize) -> Result<(), H5Error> {
        let hc_offset = self.cur.offset()?;
        let hc_length = self.cur.length()?;
        let return_pos = self.cur.pos;

        self.cur.seek(hc_offset);
        if hdr_flags & V1_FRAMING_FLAG != 0 {
            self.read_messages_v1(hc_offset + hc_length, hdr_flags, depth)?;
        } else {
            if self.opts.error_checking {
                let signature = self.cur.u32()?;
                if signature != H5_OCHK_SIGNATURE_LE {
                    return Err(H5Error::BadSignature("header continuation"));
                }
            } else {
                self.cur.skip(4);
            }
            // The final 4 bytes are the block checksum.
            self.read_messages_v0(hc_offset + hc_length - 4, hdr_flags, depth)?;
            self.cur.skip(4);
        }
        self.cur.seek(return_pos);
        Ok(())
    }

    // ---- 0x11: symbol table ----

    fn symboltable_msg(&mut self, depth: usize) -> Result<(), H5Error> {
        let btree_addr = self.cur.offset()?;
        let heap_addr = self.cur.offset()?;
        let return_pos = self.cur.pos;

        // Local heap header: all we need is the data segment address.
        self.cur.seek(heap_addr);
        if self.opts.error_checking {
            let signature = self.cur.u32()?;
            let version = self.cur.u8()?;
            if signature != H5_HEAP_SIGNATURE_LE {
                return Err(H5Error::BadSignature("local heap"));
            }
            if version != 0 {
                return Err(H5Error::Format(format!(
                    "unsupported local heap version: {version}"
                )));
            }
            self.cur
                .skip(3 + 2 * self.cur.ctx().length_size as u64);
        } else {
            self.cur
                .skip(8 + 2 * self.cur.ctx().length_size as u64);
        }
        let heap_data_addr = self.cur.offset()?;

        // Descend to the left-most leaf of the group B-tree.
        self.cur.seek(btree_addr);
        loop {
            if self.opts.error_checking {
                let signature = self.cur.u32()?;
                let node_type = self.cur.u8()?;
                if signature != H5_TREE_SIGNATURE_LE {
                    return Err(H5Error::BadSignature("group b-tree"));
                }
                if node_type != 0 {
                    return Err(H5Error::Format(format!(
                        "expected group b-tree node, got type {node_type}"
                    )));
                }
            } else {
                self.cur.skip(5);
            }
            let node_level = self.cur.u8()?;
            if node_level == 0 {
                break;
            }
            // Skip entries-used, both siblings and the first key, then
            // descend into the first child.
            let ctx = self.cur.ctx();
            self.cur
                .skip(2 + 2 * ctx.offset_size as u64 + ctx.length_size as u64);
            let first_child = self.cur.offset()?;
            self.cur.seek(first_child);
        }

        // Walk leaf nodes left to right.
        loop {
            let entries_used = self.cur.u16()?;
            let _left_sibling = self.cur.offset()?;
            let right_sibling = self.cur.offset()?;
            let _key0 = self.cur.length()?;

            for _ in 0..entries_used {
                let symbol_table_addr = self.cur.offset()?;
                let node_pos = self.cur.pos;
                self.cur.seek(symbol_table_addr);
                self.read_symbol_table(heap_data_addr, depth)?;
                self.cur.seek(node_pos);
                self.cur.skip(self.cur.ctx().length_size as u64); // next key
                if self.opts.early_exit && self.found {
                    break;
                }
            }

            if self.cur.is_undef(right_sibling) || (self.opts.early_exit && self.found) {
                break;
            }
            self.cur.seek(right_sibling);

            if self.opts.error_checking {
                let signature = self.cur.u32()?;
                let node_type = self.cur.u8()?;
                let node_level = self.cur.u8()?;
                if signature != H5_TREE_SIGNATURE_LE {
                    return Err(H5Error::BadSignature("group b-tree"));
                }
                if node_type != 0 {
                    return Err(H5Error::Format(format!(
                        "expected group b-tree node, got type {node_type}"
                    )));
                }
                if node_level != 0 {
                    return Err(H5Error::Format(format!(
                        "leaf sibling has nonzero level: {node_level}"
                    )));
                }
            } else {
                self.cur.skip(6);
            }
        }

        self.cur.seek(return_pos);
        Ok(())
    }

    /// One SNOD symbol-table node: resolve entry names through the local
    /// heap and recurse into the matching child.
    fn read_symbol_table(&mut self, heap_data_addr: u64, depth: usize) -> Result<(), H5Error> {
        if self.opts.error_checking {
            let signature = self.cur.u32()?;
            let version = self.cur.u8()?;
            if signature != H5_SNOD_SIGNATURE_LE {
                return Err(H5Error::BadSignature("symbol table node"));
            }
            if version != 1 {
                return Err(H5Error::Format(format!(
                    "incorrect symbol table version: {version}"
                )));
            }
            self.cur.skip(1);
        } else {
            self.cur.skip(6);
        }

        let num_symbols = self.cur.u16()?;
        for _ in 0..num_symbols {
            let link_name_offset = self.cur.offset()?;
            let obj_hdr_addr = self.cur.offset()?;
            let cache_type = self.cur.u32()?;
            self.cur.skip(20); // reserved + scratch pad

            let mut name_probe = self.cur.fork(heap_data_addr + link_name_offset);
            let link_name = name_probe.cstring()?;
            debug!("symbol [{depth}]: {link_name} @{obj_hdr_addr:#x}");

            let group_path = self.child_path(depth, &link_name);
            self.registry.lock().addresses.insert(group_path, obj_hdr_addr);

            if depth < self.path.len() && link_name == self.path[depth] {
                if cache_type == 2 {
                    return Err(H5Error::Unsupported(format!(
                        "symbolic link in symbol table: {link_name}"
                    )));
                }
                let return_pos = self.cur.pos;
                self.cur.seek(obj_hdr_addr);
                self.read_obj_hdr(depth + 1)?;
                self.cur.seek(return_pos);
                if self.opts.early_exit {
                    break;
                }
            }
        }
        Ok(())
    }

    // ---- 0x15: attribute info ----

    fn attributeinfo_msg(&mut self, hdr_flags: u8, depth: usize) -> Result<(), H5Error> {
        const MAX_CREATE_PRESENT_BIT: u8 = 0x01;
        const CREATE_ORDER_PRESENT_BIT: u8 = 0x02;

        let version = self.cur.u8()?;
        let flags = self.cur.u8()?;
        if self.opts.error_checking && version != 0 {
            return Err(H5Error::Format(format!(
                "unsupported attribute info version: {version}"
            )));
        }

        if flags & MAX_CREATE_PRESENT_BIT != 0 {
            self.cur.skip(2);
        }
        let heap_address = self.cur.offset()?;
        let _name_index = self.cur.offset()?;
        if flags & CREATE_ORDER_PRESENT_BIT != 0 {
            self.cur.skip(self.cur.ctx().offset_size as u64);
        }

        if !self.cur.is_undef(heap_address) {
            let return_pos = self.cur.pos;
            self.cur.seek(heap_address);
            self.read_fractal_heap(ATTRIBUTE_MSG, hdr_flags, depth)?;
            self.cur.seek(return_pos);
        }
        Ok(())
    }

    /// `a/b/attr` path for a child of the current depth.
    fn child_path(&self, depth: usize, name: &str) -> String {
        let mut parts: Vec<&str> = self.path[..depth.min(self.path.len())]
            .iter()
            .map(String::as_str)
            .collect();
        parts.push(name);
        parts.join("/")
    }
}
