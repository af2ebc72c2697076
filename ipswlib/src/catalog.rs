use std::time::Duration;

use log::debug;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Default location of the firmware catalog published by the repackaging
/// pipeline.
pub const DEFAULT_CATALOG_URL: &str = "https://rymuios.net/repackaged_data.json";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Expected HTTP {0}, but got HTTP {1}")]
    BadHttpResponse(StatusCode, StatusCode),
    #[error("Could not parse catalog: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),
}

/// A single catalog entry mapping a device model and OS version to the URL
/// of the corresponding firmware file.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct CatalogRecord {
    /// Device model identifier (eg. iPhone14,2)
    pub model: String,
    /// OS version (eg. 16.5)
    #[serde(rename = "iosVersion")]
    pub ios_version: String,
    /// Firmware download URL
    #[serde(rename = "downloadLink")]
    pub download_link: String,
}

/// The parsed firmware catalog. Records keep the order they were received in
/// and lookups return the first match.
#[derive(Debug, Default)]
pub struct Catalog {
    records: Vec<CatalogRecord>,
}

impl Catalog {
    /// Parse a catalog from a JSON array of records.
    pub fn from_json(data: &[u8]) -> Result<Self, CatalogError> {
        let records = serde_json::from_slice(data)?;

        Ok(Self { records })
    }

    /// Find the catalog record for the given model and OS version. Both
    /// fields are compared exactly, case-sensitively, with no normalization.
    /// A miss is a normal outcome, not an error.
    pub fn resolve(&self, model: &str, ios_version: &str) -> Option<&CatalogRecord> {
        self.records
            .iter()
            .find(|r| r.model == model && r.ios_version == ios_version)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<Vec<CatalogRecord>> for Catalog {
    fn from(records: Vec<CatalogRecord>) -> Self {
        Self { records }
    }
}

/// Builder type for creating catalog clients with non-default behavior.
#[derive(Clone)]
pub struct CatalogClientBuilder {
    url: String,
    timeout: Option<Duration>,
    ignore_tls_validation: bool,
}

impl CatalogClientBuilder {
    pub fn new() -> Self {
        Self {
            url: DEFAULT_CATALOG_URL.to_owned(),
            timeout: None,
            ignore_tls_validation: false,
        }
    }

    /// Fetch the catalog from a URL other than [`DEFAULT_CATALOG_URL`].
    pub fn catalog_url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = url.into();
        self
    }

    /// Fail the catalog request if it has not completed within the given
    /// duration. By default, no timeout is applied.
    pub fn timeout(mut self, value: Option<Duration>) -> Self {
        self.timeout = value;
        self
    }

    /// Ignore TLS certificate validation when performing HTTPS requests. By
    /// default, TLS certificate validation is enabled.
    pub fn ignore_tls_validation(mut self, value: bool) -> Self {
        self.ignore_tls_validation = value;
        self
    }

    /// Build the catalog client with the current options. This function fails
    /// if the TLS backend fails to initialize.
    pub fn build(&self) -> Result<CatalogClient, CatalogError> {
        CatalogClient::with_options(self)
    }
}

impl Default for CatalogClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Type for fetching the remote firmware catalog.
pub struct CatalogClient {
    client: reqwest::Client,
    url: String,
}

impl CatalogClient {
    /// Build a new catalog client object with the options from the specified
    /// builder.
    fn with_options(options: &CatalogClientBuilder) -> Result<Self, CatalogError> {
        debug!("TLS validation enabled: {}", !options.ignore_tls_validation);

        let mut builder = reqwest::ClientBuilder::new()
            .danger_accept_invalid_certs(options.ignore_tls_validation)
            .referer(false);

        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            url: options.url.clone(),
        })
    }

    /// Fetch the catalog and parse it into memory. The full response body is
    /// buffered before parsing; the catalog is small enough that this is not
    /// a concern.
    pub async fn fetch_catalog(&self) -> Result<Catalog, CatalogError> {
        debug!("Catalog URL: {}", self.url);

        let r = self.client.get(&self.url).send().await?;
        let status = r.status();

        if !status.is_success() {
            return Err(CatalogError::BadHttpResponse(StatusCode::OK, status));
        }

        let data = r.bytes().await?;
        debug!("Catalog response: {} bytes", data.len());

        Catalog::from_json(&data)
    }
}
