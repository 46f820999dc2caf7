use std::sync::atomic::{AtomicBool, Ordering};

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_smithy_runtime::client::http::hyper_014::HyperClientBuilder;
use tokio::runtime::Runtime;

use crate::error::H5Error;
use crate::io::driver::Driver;

/// How to authenticate against S3.
#[derive(Debug, Clone, Default)]
pub enum S3Credentials {
    /// Standard provider chain (env, config files, IMDS).
    #[default]
    Default,
    /// Unsigned requests for public buckets.
    Anonymous,
    /// Named profile from the shared AWS config.
    Profile(String),
    /// Explicit access key / secret key / optional session token.
    Keys {
        access_key_id: String,
        secret_access_key: String,
        session_token: Option<String>,
    },
}

/// Connection pool cap when the caller does not provide one. Sized for
/// high worker fan-out against a single endpoint.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// S3 driver. The resource string is split at the first `/` into bucket and
/// key; each read is one ranged GET. The driver owns a connection pool
/// sized by the caller-provided cap, applied to the SDK client's HTTP
/// connector. The SDK client is async, so the driver also owns a small
/// single-thread runtime and blocks on it; `duplicate` opens a whole new
/// driver at the same cap, so independent workers never contend on one
/// runtime or pool.
pub struct S3Driver {
    runtime: Runtime,
    client: Client,
    bucket: String,
    key: String,
    credentials: S3Credentials,
    max_connections: usize,
    closed: AtomicBool,
}

impl S3Driver {
    pub fn open(
        resource: &str,
        credentials: S3Credentials,
        max_connections: Option<usize>,
    ) -> Result<Self, H5Error> {
        let (bucket, key) = split_resource(resource)?;
        let max_connections = max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| H5Error::Io(format!("failed to start S3 runtime: {e}")))?;
        let client = build_client(&runtime, &credentials, max_connections);
        Ok(Self {
            runtime,
            client,
            bucket,
            key,
            credentials,
            max_connections,
            closed: AtomicBool::new(false),
        })
    }
}

fn build_client(runtime: &Runtime, credentials: &S3Credentials, max_connections: usize) -> Client {
    // The pool cap lives on the hyper client underneath the SDK.
    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .https_or_http()
        .enable_http1()
        .build();
    let mut hyper_builder = hyper::Client::builder();
    hyper_builder.pool_max_idle_per_host(max_connections);
    let http_client = HyperClientBuilder::new()
        .hyper_builder(hyper_builder)
        .build(https_connector);

    let config = runtime.block_on(async {
        let defaults =
            aws_config::defaults(BehaviorVersion::latest()).http_client(http_client);
        match credentials {
            S3Credentials::Default => defaults.load().await,
            S3Credentials::Anonymous => defaults.no_credentials().load().await,
            S3Credentials::Profile(name) => defaults.profile_name(name).load().await,
            S3Credentials::Keys {
                access_key_id,
                secret_access_key,
                session_token,
            } => {
                defaults
                    .credentials_provider(Credentials::new(
                        access_key_id,
                        secret_access_key,
                        session_token.clone(),
                        None,
                        "h5cloud",
                    ))
                    .load()
                    .await
            }
        }
    });
    Client::new(&config)
}

/// Split `bucket/path/to/key` at the first separator.
pub fn split_resource(resource: &str) -> Result<(String, String), H5Error> {
    let trimmed = resource.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
            Ok((bucket.to_string(), key.to_string()))
        }
        _ => Err(H5Error::Io(format!(
            "S3 resource must be bucket/key, got {resource:?}"
        ))),
    }
}

impl Driver for S3Driver {
    fn read_at_most(&self, offset: u64, size: usize) -> Result<Vec<u8>, H5Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(H5Error::Closed);
        }
        if size == 0 {
            return Ok(Vec::new());
        }
        let range = format!("bytes={}-{}", offset, offset + size as u64 - 1);
        let bytes = self.runtime.block_on(async {
            let output = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .range(range)
                .send()
                .await
                .map_err(|e| {
                    H5Error::Io(format!(
                        "s3://{}/{} range get failed: {e}",
                        self.bucket, self.key
                    ))
                })?;
            output.body.collect().await.map_err(|e| {
                H5Error::Io(format!(
                    "s3://{}/{} body read failed: {e}",
                    self.bucket, self.key
                ))
            })
        })?;
        // S3 clamps ranges that run past the object's end; exactness is
        // checked by the default `read`.
        Ok(bytes.into_bytes().to_vec())
    }

    fn duplicate(&self) -> Result<Box<dyn Driver>, H5Error> {
        let resource = format!("{}/{}", self.bucket, self.key);
        Ok(Box::new(S3Driver::open(
            &resource,
            self.credentials.clone(),
            Some(self.max_connections),
        )?))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_splits_at_first_slash() {
        let (bucket, key) = split_resource("my-bucket/path/to/granule.h5").unwrap();
        assert_eq!(bucket, "my-bucket");
        assert_eq!(key, "path/to/granule.h5");
    }

    #[test]
    fn leading_slash_is_tolerated() {
        let (bucket, key) = split_resource("/bucket/key").unwrap();
        assert_eq!(bucket, "bucket");
        assert_eq!(key, "key");
    }

    #[test]
    fn bare_bucket_is_rejected() {
        assert!(split_resource("just-a-bucket").is_err());
    }
}
