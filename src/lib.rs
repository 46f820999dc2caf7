//! Cloud-optimized, read-only access to HDF5 files in S3, local storage or
//! HTTP endpoints: parse just enough of the format to materialize selected
//! hyperslices of datasets with the minimum number of range reads.

pub mod api;
pub mod error;
pub mod h5;
pub mod hyperslice;
pub mod io;
pub mod meta;
pub mod orchestrator;
pub mod promise;
pub mod values;

pub use api::{DatasetInfo, DatasetRequest, GroupListing, ReadOptions, Scheduling, VariableInfo};
pub use error::H5Error;
pub use hyperslice::DimSpec;
pub use meta::{DataType, Layout, Metadata};
pub use orchestrator::H5File;
pub use promise::Promise;
pub use values::DatasetValues;
