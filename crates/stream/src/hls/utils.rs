use std::time::Duration;

use url::Url;

use crate::{
    config::RetryPolicy,
    error::{IoriError, IoriResult},
    hls::playlist::{parse_playlist, Playlist},
    util::{http::HttpClient, retry::with_retry},
};

/// Fetch and parse a playlist. Network failures are retried, parse failures are not.
pub async fn load_m3u8(
    client: &HttpClient,
    url: &Url,
    retry: &RetryPolicy,
    timeout: Option<Duration>,
) -> IoriResult<Playlist> {
    tracing::debug!("Start fetching M3U8 file {url}.");

    let bytes = with_retry(retry, url.as_str(), || client.get_bytes(url, None, timeout))
        .await
        .map_err(|reason| IoriError::PlaylistFetch {
            url: url.clone(),
            reason,
        })?;
    let playlist = parse_playlist(&String::from_utf8_lossy(&bytes), url)?;

    tracing::debug!("M3U8 file fetched.");
    Ok(playlist)
}
