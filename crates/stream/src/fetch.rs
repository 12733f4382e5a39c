use std::time::Duration;

use bytes::Bytes;
use url::Url;

use crate::{
    config::RetryPolicy,
    error::{IoriError, IoriResult},
    hls::playlist::{InitSection, Segment},
    util::{http::HttpClient, range::ByteRange, retry::with_retry},
};

/// Retrieves segment payloads, retrying transient failures.
#[derive(Clone)]
pub struct SegmentFetcher {
    client: HttpClient,
    retry: RetryPolicy,
    timeout: Option<Duration>,
}

impl SegmentFetcher {
    pub fn new(client: HttpClient, retry: RetryPolicy, timeout: Option<Duration>) -> Self {
        Self {
            client,
            retry,
            timeout,
        }
    }

    pub async fn fetch(&self, segment: &Segment) -> IoriResult<Bytes> {
        self.fetch_resource(&segment.uri, segment.byte_range)
            .await
            .map_err(|reason| IoriError::SegmentFetch {
                sequence: segment.sequence_number,
                url: segment.uri.clone(),
                reason,
            })
    }

    /// Fetch the `#EXT-X-MAP` section the segment depends on.
    pub async fn fetch_init_section(
        &self,
        segment: &Segment,
        init: &InitSection,
    ) -> IoriResult<Bytes> {
        self.fetch_resource(&init.uri, init.byte_range)
            .await
            .map_err(|reason| IoriError::SegmentFetch {
                sequence: segment.sequence_number,
                url: init.uri.clone(),
                reason: format!("init section: {reason}"),
            })
    }

    async fn fetch_resource(&self, url: &Url, range: Option<ByteRange>) -> Result<Bytes, String> {
        with_retry(&self.retry, url.as_str(), || {
            self.client.get_bytes(url, range, self.timeout)
        })
        .await
    }
}
