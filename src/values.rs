use zerocopy::FromBytes;
use zerocopy::byteorder::little_endian;

use crate::error::H5Error;
use crate::meta::{DataType, Metadata};

/// The materialized result of one dataset read: a flat little-endian
/// buffer shaped by the requested hyperslice, a decoded string, or (for
/// meta-only requests) just the metadata record.
#[derive(Debug, Clone)]
pub struct DatasetValues {
    pub meta: Metadata,
    pub shape: Vec<u64>,
    data: ValueData,
}

#[derive(Debug, Clone)]
enum ValueData {
    Raw(Vec<u8>),
    Text(String),
    Empty,
}

impl DatasetValues {
    pub(crate) fn raw(meta: Metadata, shape: Vec<u64>, bytes: Vec<u8>) -> Self {
        Self {
            meta,
            shape,
            data: ValueData::Raw(bytes),
        }
    }

    pub(crate) fn text(meta: Metadata, shape: Vec<u64>, text: String) -> Self {
        Self {
            meta,
            shape,
            data: ValueData::Text(text),
        }
    }

    pub(crate) fn meta_only(meta: Metadata) -> Self {
        Self {
            meta,
            shape: Vec::new(),
            data: ValueData::Empty,
        }
    }

    /// Element count for array results, character count for strings.
    pub fn len(&self) -> usize {
        match &self.data {
            ValueData::Raw(bytes) => {
                if self.meta.type_size == 0 {
                    0
                } else {
                    bytes.len() / self.meta.type_size
                }
            }
            ValueData::Text(s) => s.len(),
            ValueData::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_string(&self) -> bool {
        self.meta.datatype == Some(DataType::String)
    }

    /// True for meta-only results that carry no payload.
    pub fn is_meta_only(&self) -> bool {
        matches!(self.data, ValueData::Empty)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.data {
            ValueData::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.data {
            ValueData::Raw(bytes) => bytes,
            _ => &[],
        }
    }

    fn expect(&self, datatype: DataType, size: usize) -> Result<&[u8], H5Error> {
        if self.meta.datatype != Some(datatype) || self.meta.type_size != size {
            return Err(H5Error::Format(format!(
                "dataset holds {:?} of {} bytes, not {datatype:?} of {size}",
                self.meta.datatype, self.meta.type_size
            )));
        }
        match &self.data {
            ValueData::Raw(bytes) => Ok(bytes),
            _ => Err(H5Error::Format("dataset has no array payload".into())),
        }
    }

    pub fn to_f32(&self) -> Result<Vec<f32>, H5Error> {
        let bytes = self.expect(DataType::FloatingPoint, 4)?;
        let lanes = <[little_endian::F32]>::ref_from_bytes(bytes)
            .map_err(|_| H5Error::Format("buffer is not a whole number of f32".into()))?;
        Ok(lanes.iter().map(|v| v.get()).collect())
    }

    pub fn to_f64(&self) -> Result<Vec<f64>, H5Error> {
        let bytes = self.expect(DataType::FloatingPoint, 8)?;
        let lanes = <[little_endian::F64]>::ref_from_bytes(bytes)
            .map_err(|_| H5Error::Format("buffer is not a whole number of f64".into()))?;
        Ok(lanes.iter().map(|v| v.get()).collect())
    }

    pub fn to_i8(&self) -> Result<Vec<i8>, H5Error> {
        let bytes = self.expect(DataType::FixedPoint, 1)?;
        Ok(bytes.iter().map(|&b| b as i8).collect())
    }

    pub fn to_u8(&self) -> Result<Vec<u8>, H5Error> {
        Ok(self.expect(DataType::FixedPoint, 1)?.to_vec())
    }

    pub fn to_i16(&self) -> Result<Vec<i16>, H5Error> {
        let bytes = self.expect(DataType::FixedPoint, 2)?;
        let lanes = <[little_endian::I16]>::ref_from_bytes(bytes)
            .map_err(|_| H5Error::Format("buffer is not a whole number of i16".into()))?;
        Ok(lanes.iter().map(|v| v.get()).collect())
    }

    pub fn to_u16(&self) -> Result<Vec<u16>, H5Error> {
        let bytes = self.expect(DataType::FixedPoint, 2)?;
        let lanes = <[little_endian::U16]>::ref_from_bytes(bytes)
            .map_err(|_| H5Error::Format("buffer is not a whole number of u16".into()))?;
        Ok(lanes.iter().map(|v| v.get()).collect())
    }

    pub fn to_i32(&self) -> Result<Vec<i32>, H5Error> {
        let bytes = self.expect(DataType::FixedPoint, 4)?;
        let lanes = <[little_endian::I32]>::ref_from_bytes(bytes)
            .map_err(|_| H5Error::Format("buffer is not a whole number of i32".into()))?;
        Ok(lanes.iter().map(|v| v.get()).collect())
    }

    pub fn to_u32(&self) -> Result<Vec<u32>, H5Error> {
        let bytes = self.expect(DataType::FixedPoint, 4)?;
        let lanes = <[little_endian::U32]>::ref_from_bytes(bytes)
            .map_err(|_| H5Error::Format("buffer is not a whole number of u32".into()))?;
        Ok(lanes.iter().map(|v| v.get()).collect())
    }

    pub fn to_i64(&self) -> Result<Vec<i64>, H5Error> {
        let bytes = self.expect(DataType::FixedPoint, 8)?;
        let lanes = <[little_endian::I64]>::ref_from_bytes(bytes)
            .map_err(|_| H5Error::Format("buffer is not a whole number of i64".into()))?;
        Ok(lanes.iter().map(|v| v.get()).collect())
    }

    pub fn to_u64(&self) -> Result<Vec<u64>, H5Error> {
        let bytes = self.expect(DataType::FixedPoint, 8)?;
        let lanes = <[little_endian::U64]>::ref_from_bytes(bytes)
            .map_err(|_| H5Error::Format("buffer is not a whole number of u64".into()))?;
        Ok(lanes.iter().map(|v| v.get()).collect())
    }
}
