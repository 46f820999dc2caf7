pub mod cache;
pub mod driver;
pub mod file;
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "s3")]
pub mod s3;

pub use cache::Source;
pub use driver::Driver;
pub use file::FileDriver;
#[cfg(feature = "http")]
pub use http::HttpDriver;
#[cfg(feature = "s3")]
pub use s3::{DEFAULT_MAX_CONNECTIONS, S3Credentials, S3Driver};
