use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, RANGE};

use crate::error::H5Error;
use crate::io::driver::Driver;

/// HTTP(S) driver. Issues `Range: bytes=lo-hi` GETs against a single URL,
/// optionally carrying a bearer token (e.g. an Earthdata login token).
pub struct HttpDriver {
    url: String,
    token: Option<String>,
    client: Client,
    closed: AtomicBool,
}

impl HttpDriver {
    pub fn open(url: &str, token: Option<&str>) -> Result<Self, H5Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| H5Error::Io(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.to_string(),
            token: token.map(str::to_string),
            client,
            closed: AtomicBool::new(false),
        })
    }
}

impl Driver for HttpDriver {
    fn read_at_most(&self, offset: u64, size: usize) -> Result<Vec<u8>, H5Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(H5Error::Closed);
        }
        if size == 0 {
            return Ok(Vec::new());
        }
        let range = format!("bytes={}-{}", offset, offset + size as u64 - 1);
        let mut request = self.client.get(&self.url).header(RANGE, range);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = request
            .send()
            .map_err(|e| H5Error::Io(format!("GET {} failed: {e}", self.url)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(H5Error::Io(format!("GET {} returned {status}", self.url)));
        }
        let body = response
            .bytes()
            .map_err(|e| H5Error::Io(format!("reading body of {} failed: {e}", self.url)))?;
        // Servers clamp ranges that run past EOF; exactness is checked by
        // the default `read`.
        Ok(body.to_vec())
    }

    fn duplicate(&self) -> Result<Box<dyn Driver>, H5Error> {
        Ok(Box::new(HttpDriver::open(&self.url, self.token.as_deref())?))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
