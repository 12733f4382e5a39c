use std::{ops::Deref, sync::Arc, time::Duration};

use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, RANGE},
    Client, ClientBuilder, IntoUrl, StatusCode, Url,
};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};

use crate::{error::IoriResult, util::range::ByteRange};

/// A http client shared by every request of a session.
///
/// Site plugins hand over headers and cookies, everything else is opaque to the stream.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cookies_store: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> IoriResult<Self> {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = builder.cookie_provider(cookies_store.clone()).build()?;

        Ok(Self {
            client,
            cookies_store,
        })
    }

    /// Build a client that sends `headers` with every request.
    pub fn with_headers(headers: HeaderMap) -> IoriResult<Self> {
        Self::new(Client::builder().default_headers(headers))
    }

    pub fn add_cookies(&self, cookies: Vec<String>, url: impl IntoUrl) -> IoriResult<()> {
        let url = url.into_url()?;
        let Ok(mut lock) = self.cookies_store.lock() else {
            tracing::warn!("Cookie store is poisoned, cookies for {url} are ignored.");
            return Ok(());
        };
        for cookie in cookies {
            _ = lock.parse(&cookie, &url);
        }
        Ok(())
    }

    /// Perform a single GET request and check the response body is complete.
    pub(crate) async fn get_bytes(
        &self,
        url: &Url,
        range: Option<ByteRange>,
        timeout: Option<Duration>,
    ) -> Result<Bytes, FetchFailure> {
        let mut request = self.client.get(url.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range.to_http_range());
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            if let Ok(body) = response.text().await {
                tracing::debug!("Error body: {body}");
            }
            let reason = format!("HTTP {status}");
            return Err(
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    FetchFailure::Transient(reason)
                } else {
                    FetchFailure::Fatal(reason)
                },
            );
        }

        let content_length = response.content_length();
        let bytes = response.bytes().await?;
        if let Some(expected) = content_length {
            if expected != bytes.len() as u64 {
                return Err(FetchFailure::Transient(format!(
                    "expected {expected} bytes, received {}",
                    bytes.len()
                )));
            }
        }

        match range {
            Some(range) if range.length > 0 => {
                if status == StatusCode::PARTIAL_CONTENT {
                    if bytes.len() as u64 != range.length {
                        return Err(FetchFailure::Fatal(format!(
                            "range {} returned {} bytes",
                            range.to_http_range(),
                            bytes.len()
                        )));
                    }
                    Ok(bytes)
                } else if bytes.len() as u64 >= range.end() {
                    // server ignored the range header and sent the whole resource
                    Ok(bytes.slice(range.offset as usize..range.end() as usize))
                } else {
                    Err(FetchFailure::Fatal(format!(
                        "resource of {} bytes does not cover range {}",
                        bytes.len(),
                        range.to_http_range()
                    )))
                }
            }
            _ => Ok(bytes),
        }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = Client::builder()
            .cookie_provider(cookies_store.clone())
            .build()
            .expect("failed to build default http client");

        Self {
            client,
            cookies_store,
        }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

/// Outcome of a failed request attempt.
#[derive(Debug)]
pub(crate) enum FetchFailure {
    /// Worth another attempt: timeouts, broken connections, 5xx.
    Transient(String),
    Fatal(String),
}

impl FetchFailure {
    pub(crate) fn reason(self) -> String {
        match self {
            Self::Transient(reason) | Self::Fatal(reason) => reason,
        }
    }
}

impl From<reqwest::Error> for FetchFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
            Self::Transient(e.to_string())
        } else {
            Self::Fatal(e.to_string())
        }
    }
}
