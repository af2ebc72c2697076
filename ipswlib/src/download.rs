use std::{
    io,
    time::Duration,
};

use bytes::Bytes;
use futures_core::Stream;
use log::debug;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Expected HTTP {0}, but got HTTP {1}")]
    BadHttpResponse(StatusCode, StatusCode),
    #[error("Server reported an empty or unknown firmware size")]
    EmptyOrUnknownSize,
    #[error("Downloaded content looks like an HTML error page")]
    HtmlErrorPage,
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),
}

/// Builder type for creating download clients with non-default behavior.
#[derive(Clone)]
pub struct DownloadClientBuilder {
    connect_timeout: Option<Duration>,
    ignore_tls_validation: bool,
}

impl DownloadClientBuilder {
    pub fn new() -> Self {
        Self {
            connect_timeout: None,
            ignore_tls_validation: false,
        }
    }

    /// Fail a download attempt if the connection to the mirror cannot be
    /// established within the given duration. By default, no timeout is
    /// applied and an unresponsive server will stall the attempt. The time
    /// spent transferring the body is never bounded.
    pub fn connect_timeout(mut self, value: Option<Duration>) -> Self {
        self.connect_timeout = value;
        self
    }

    /// Ignore TLS certificate validation when performing HTTPS requests. By
    /// default, TLS certificate validation is enabled.
    pub fn ignore_tls_validation(mut self, value: bool) -> Self {
        self.ignore_tls_validation = value;
        self
    }

    /// Build the download client with the current options. This function
    /// fails if the TLS backend fails to initialize.
    pub fn build(&self) -> Result<DownloadClient, DownloadError> {
        DownloadClient::with_options(self)
    }
}

impl Default for DownloadClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Type for downloading firmware files from a mirror. The client holds no
/// state besides the connection options, so a caller may use one instance
/// per attempt or share it freely.
pub struct DownloadClient {
    client: reqwest::Client,
}

impl DownloadClient {
    /// Build a new download client object with the options from the
    /// specified builder.
    fn with_options(options: &DownloadClientBuilder) -> Result<Self, DownloadError> {
        debug!("TLS validation enabled: {}", !options.ignore_tls_validation);

        let mut builder = reqwest::ClientBuilder::new()
            .danger_accept_invalid_certs(options.ignore_tls_validation)
            .referer(false);

        if let Some(timeout) = options.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Create an async byte stream for downloading the specified URL. Returns
    /// the total size reported by the server, if any, along with the stream.
    /// The reported size reflects the Content-Length header only; whether the
    /// body actually holds firmware rather than an error page is for the
    /// caller to validate once the bytes are on disk.
    pub async fn download(
        &self,
        url: &str,
    ) -> Result<(Option<u64>, impl Stream<Item = reqwest::Result<Bytes>>), DownloadError> {
        debug!("Download URL: {url}");

        let r = self.client.get(url).send().await?;
        let status = r.status();

        if !status.is_success() {
            return Err(DownloadError::BadHttpResponse(StatusCode::OK, status));
        }

        let total = r.content_length();
        debug!("Reported content length: {:?}", total);

        Ok((total, r.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tokio_stream::StreamExt;

    use super::*;

    #[tokio::test]
    async fn test_download() {
        let body = b"not actually an ipsw";

        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/a/b/c.ipsw")
            .with_body(body)
            .create_async()
            .await;

        let client = DownloadClientBuilder::new().build().unwrap();
        let (total, stream) = client
            .download(&format!("{}/a/b/c.ipsw", server.url()))
            .await
            .unwrap();

        assert_eq!(total, Some(body.len() as u64));

        let mut stream = Box::pin(stream);
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(data, body);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_download_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/a/b/c.ipsw")
            .with_status(404)
            .create_async()
            .await;

        let client = DownloadClientBuilder::new().build().unwrap();

        // The Ok variant holds a non-Debug byte stream; drop it so the result
        // can be formatted by assert_matches on failure. The assertion itself
        // is unchanged.
        let result = client
            .download(&format!("{}/a/b/c.ipsw", server.url()))
            .await
            .map(|(total, _stream)| total);
        assert_matches!(result,
                        Err(DownloadError::BadHttpResponse(_, s)) if s.as_u16() == 404);
    }
}
