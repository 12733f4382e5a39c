use std::time::Duration;

use iori_stream::{IoriError, SequencerState, StreamOptions};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use super::{media_playlist, read_all, session, HlsMock};
use crate::{encrypt, random_bytes};

#[tokio::test]
async fn test_malformed_playlist_fails_at_open() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server
        .mock("/garbage.m3u8", "<html>not a playlist</html>")
        .await
        .mock("/no-target.m3u8", "#EXTM3U\n#EXTINF:1.0,\n0.ts\n")
        .await;

    let session = session(StreamOptions::default());
    let result = session
        .open(&format!("{}/garbage.m3u8", server.uri()))
        .await;
    assert!(matches!(result, Err(IoriError::MalformedPlaylist(_))));

    let result = session
        .open(&format!("{}/no-target.m3u8", server.uri()))
        .await;
    assert!(matches!(result, Err(IoriError::MalformedPlaylist(_))));

    Ok(())
}

#[tokio::test]
async fn test_media_playlist_has_no_variants() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server
        .mock("/media.m3u8", media_playlist(0, None, "{}.ts", true))
        .await;

    let result = session(StreamOptions::default())
        .variants(&format!("{}/media.m3u8", server.uri()))
        .await;
    assert!(matches!(result, Err(IoriError::NoVariantsFound)));

    Ok(())
}

#[tokio::test]
async fn test_playlist_fetch_exhausts_retries() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down.m3u8"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let result = session(StreamOptions::default())
        .open(&format!("{}/down.m3u8", server.uri()))
        .await;
    assert!(matches!(result, Err(IoriError::PlaylistFetch { .. })));

    Ok(())
}

#[tokio::test]
async fn test_segment_retry_after_server_error() -> anyhow::Result<()> {
    let payloads: Vec<Vec<u8>> = (0..4).map(|_| random_bytes(256)).collect();

    let server = MockServer::start().await;
    server
        .mock("/index.m3u8", media_playlist(0, None, "{}.ts", true))
        .await;
    Mock::given(method("GET"))
        .and(path("/1.ts"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    for (i, data) in payloads.iter().enumerate() {
        server.mock(&format!("/{i}.ts"), data.clone()).await;
    }

    let mut reader = session(StreamOptions::default())
        .open(&format!("{}/index.m3u8", server.uri()))
        .await?;
    assert_eq!(read_all(&mut reader).await?, payloads.concat());

    Ok(())
}

#[tokio::test]
async fn test_segment_not_found_surfaces_on_read() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server
        .mock("/index.m3u8", media_playlist(0, None, "{}.ts", true))
        .await
        .mock("/0.ts", vec![0u8; 16])
        .await;
    // not retried
    Mock::given(method("GET"))
        .and(path("/1.ts"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let mut reader = session(StreamOptions::default())
        .open(&format!("{}/index.m3u8", server.uri()))
        .await?;
    let result = read_all(&mut reader).await;
    assert!(matches!(
        result,
        Err(IoriError::SegmentFetch { sequence: 1, .. })
    ));
    assert_eq!(reader.state(), SequencerState::Failed);
    assert!(reader.read(16).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_key_fetch_failure() -> anyhow::Result<()> {
    let iv = [3u8; 16];
    let server = MockServer::start().await;
    server
        .mock("/index.m3u8", media_playlist(0, Some(&iv), "{}.ts", true))
        .await;
    Mock::given(method("GET"))
        .and(path("/encryption_key.key"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let mut reader = session(StreamOptions::default())
        .open(&format!("{}/index.m3u8", server.uri()))
        .await?;
    let result = read_all(&mut reader).await;
    assert!(matches!(result, Err(IoriError::KeyFetch { .. })));

    Ok(())
}

#[tokio::test]
async fn test_wrong_key_fails_decryption() -> anyhow::Result<()> {
    let key = [1u8; 16];
    let iv = [2u8; 16];
    let server = MockServer::start().await;
    server
        .mock("/index.m3u8", media_playlist(0, Some(&iv), "{}.ts", true))
        .await
        .mock("/encryption_key.key", vec![9u8; 16])
        .await;
    for i in 0..4 {
        server
            .mock(&format!("/{i}.ts"), encrypt(&random_bytes(64), &key, &iv))
            .await;
    }

    let mut reader = session(StreamOptions::default())
        .open(&format!("{}/index.m3u8", server.uri()))
        .await?;
    let result = tokio::time::timeout(Duration::from_secs(5), read_all(&mut reader)).await?;
    assert!(matches!(result, Err(IoriError::Decryption(_))));

    Ok(())
}

#[tokio::test]
async fn test_late_worker_failure_keeps_failed_state() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server
        .mock("/index.m3u8", media_playlist(0, None, "{}.ts", true))
        .await;
    for i in [0, 2, 3] {
        server.mock(&format!("/{i}.ts"), vec![0u8; 16]).await;
    }
    // fails only after every job has been dispatched
    Mock::given(method("GET"))
        .and(path("/1.ts"))
        .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_millis(100)))
        .mount(&server)
        .await;

    let mut reader = session(StreamOptions::default().with_workers(4))
        .open(&format!("{}/index.m3u8", server.uri()))
        .await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(reader.state(), SequencerState::Failed);

    let result = read_all(&mut reader).await;
    assert!(matches!(
        result,
        Err(IoriError::SegmentFetch { sequence: 1, .. })
    ));
    assert_eq!(reader.state(), SequencerState::Failed);

    Ok(())
}
