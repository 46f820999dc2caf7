use std::collections::HashMap;

use crate::error::H5Error;

/// HDF5 datatype classes. Only fixed-point, floating-point and string are
/// materialized; the rest are recognized at the metadata level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    FixedPoint,
    FloatingPoint,
    Time,
    String,
    BitField,
    Opaque,
    Compound,
    Reference,
    Enumerated,
    VariableLength,
    Array,
}

impl DataType {
    pub fn from_class(class: u8) -> Option<Self> {
        Some(match class {
            0 => Self::FixedPoint,
            1 => Self::FloatingPoint,
            2 => Self::Time,
            3 => Self::String,
            4 => Self::BitField,
            5 => Self::Opaque,
            6 => Self::Compound,
            7 => Self::Reference,
            8 => Self::Enumerated,
            9 => Self::VariableLength,
            10 => Self::Array,
            _ => return None,
        })
    }
}

/// Data layout classes, as encoded in the v3 data layout message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Compact,
    Contiguous,
    Chunked,
}

/// Filter pipeline flags. Only deflate and shuffle are honored at read
/// time; the others are recorded so the read path can refuse them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterSet {
    pub deflate: bool,
    pub shuffle: bool,
    pub fletcher32: bool,
    pub szip: bool,
    pub nbit: bool,
    pub scaleoffset: bool,
}

impl FilterSet {
    /// Record a filter by its HDF5 pipeline ID. Unknown IDs are fatal.
    pub fn enable(&mut self, id: u16) -> Result<(), H5Error> {
        match id {
            1 => self.deflate = true,
            2 => self.shuffle = true,
            3 => self.fletcher32 = true,
            4 => self.szip = true,
            5 => self.nbit = true,
            6 => self.scaleoffset = true,
            other => {
                return Err(H5Error::Unsupported(format!("filter id {other}")));
            }
        }
        Ok(())
    }

    pub fn any(&self) -> bool {
        self.deflate || self.shuffle || self.fletcher32 || self.szip || self.nbit || self.scaleoffset
    }

    /// The first recorded filter the read path cannot honor, if any.
    pub fn unsupported(&self) -> Option<&'static str> {
        if self.fletcher32 {
            Some("fletcher32")
        } else if self.szip {
            Some("szip")
        } else if self.nbit {
            Some("nbit")
        } else if self.scaleoffset {
            Some("scaleoffset")
        } else {
            None
        }
    }
}

/// Everything the message walk learns about one dataset (or attribute).
#[derive(Debug, Clone)]
pub struct Metadata {
    pub ndims: Option<usize>,
    pub dimensions: Vec<u64>,
    pub datatype: Option<DataType>,
    pub type_size: usize,
    pub signed: bool,
    pub fill_value: Vec<u8>,
    pub layout: Option<Layout>,
    pub size: u64,
    pub address: u64,
    pub chunk_elements: u64,
    pub chunk_dimensions: Vec<u64>,
    pub element_size: u64,
    pub is_attribute: bool,
    pub filter: FilterSet,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            ndims: None,
            dimensions: Vec::new(),
            datatype: None,
            type_size: 0,
            signed: true,
            fill_value: Vec::new(),
            layout: None,
            size: 0,
            address: 0,
            chunk_elements: 0,
            chunk_dimensions: Vec::new(),
            element_size: 0,
            is_attribute: false,
            filter: FilterSet::default(),
        }
    }
}

impl Metadata {
    /// True once a datatype message has populated the record.
    pub fn is_resolved(&self) -> bool {
        self.type_size != 0
    }

    pub fn is_string(&self) -> bool {
        self.datatype == Some(DataType::String)
    }

    /// Element count of the full dataset.
    pub fn elements(&self) -> u64 {
        self.dimensions.iter().product()
    }
}

/// Per-resource memoization: path → object-header address and path →
/// parsed metadata. Written by every hard link, symbol-table entry and
/// attribute the walk encounters; read to resume from the deepest known
/// prefix of a requested path.
#[derive(Default)]
pub struct Registry {
    pub addresses: HashMap<String, u64>,
    pub metadata: HashMap<String, Metadata>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_ids_map_to_flags() {
        let mut f = FilterSet::default();
        f.enable(1).unwrap();
        f.enable(2).unwrap();
        assert!(f.deflate && f.shuffle);
        assert_eq!(f.unsupported(), None);

        f.enable(3).unwrap();
        assert_eq!(f.unsupported(), Some("fletcher32"));
    }

    #[test]
    fn unknown_filter_id_is_fatal() {
        let mut f = FilterSet::default();
        assert!(matches!(f.enable(307), Err(H5Error::Unsupported(_))));
    }

    #[test]
    fn datatype_classes_roundtrip() {
        assert_eq!(DataType::from_class(0), Some(DataType::FixedPoint));
        assert_eq!(DataType::from_class(3), Some(DataType::String));
        assert_eq!(DataType::from_class(9), Some(DataType::VariableLength));
        assert_eq!(DataType::from_class(11), None);
    }
}
