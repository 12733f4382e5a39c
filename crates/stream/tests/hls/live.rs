use std::time::Duration;

use iori_stream::{SequencerState, StreamOptions};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use super::{master_playlist, media_playlist, read_all, session, HlsMock, MEDIA_SEQUENCE};
use crate::{encrypt, init_test_tracing, random_bytes};

#[tokio::test]
async fn test_live_encrypted_aes128() -> anyhow::Result<()> {
    init_test_tracing();

    let key: [u8; 16] = rand::random();
    let iv: [u8; 16] = rand::random();
    let clear: Vec<Vec<u8>> = (0..4).map(|_| random_bytes(1024)).collect();

    let server = MockServer::start().await;
    server
        .mock("/path/master.m3u8", master_playlist())
        .await
        .mock_times(
            "/path/playlist.m3u8",
            media_playlist(MEDIA_SEQUENCE, Some(&iv), "stream{}.ts.enc", false),
            1,
        )
        .await
        .mock(
            "/path/playlist.m3u8",
            media_playlist(MEDIA_SEQUENCE + 4, Some(&iv), "stream2_{}.ts.enc", true),
        )
        .await;
    Mock::given(method("GET"))
        .and(path("/path/encryption_key.key"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(key.to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    for (i, data) in clear.iter().enumerate() {
        let encrypted = encrypt(data, &key, &iv);
        server
            .mock(&format!("/path/stream{i}.ts.enc"), encrypted.clone())
            .await
            .mock(&format!("/path/stream2_{i}.ts.enc"), encrypted)
            .await;
    }

    let variants = session(StreamOptions::default())
        .variants(&format!("{}/path/master.m3u8", server.uri()))
        .await?;
    let stream = variants
        .get("1080p (source)")
        .ok_or_else(|| anyhow::anyhow!("variant not found"))?;
    let mut reader = stream.open().await?;
    let data = read_all(&mut reader).await?;
    reader.close();

    // live streams start with the last 3 segments of the first playlist
    let expected: Vec<u8> = clear[1..].iter().chain(clear.iter()).flatten().copied().collect();
    assert_eq!(data.len(), expected.len());
    assert_eq!(data, expected);

    Ok(())
}

#[tokio::test]
async fn test_live_refresh_emits_each_segment_once() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    // 0..4, then 2..6, then 4..8 with end marker
    server
        .mock_times("/live.m3u8", media_playlist(0, None, "{}.ts", false), 1)
        .await
        .mock_times("/live.m3u8", media_playlist(2, None, "{}.ts", false), 1)
        .await
        .mock("/live.m3u8", media_playlist(4, None, "{}.ts", true))
        .await;

    // the template restarts at 0 for every playlist, serve names by position
    let payloads: Vec<Vec<u8>> = (0..4).map(|i| vec![i as u8; 16]).collect();
    for (i, data) in payloads.iter().enumerate() {
        Mock::given(method("GET"))
            .and(path(format!("/{i}.ts")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
            .mount(&server)
            .await;
    }

    let mut reader = session(StreamOptions::default().with_live_edge(2))
        .stream(format!("{}/live.m3u8", server.uri()).parse()?)
        .open()
        .await?;
    let data = read_all(&mut reader).await?;

    // first load: #2 #3, second: #4 #5 (positions 2, 3), third: #6 #7 (positions 2, 3)
    let expected: Vec<u8> = [2, 3, 2, 3, 2, 3]
        .iter()
        .flat_map(|i| payloads[*i].clone())
        .collect();
    assert_eq!(data, expected);

    let mut state = reader.watch_state();
    tokio::time::timeout(
        Duration::from_secs(1),
        state.wait_for(|s| *s == SequencerState::Done),
    )
    .await??;

    Ok(())
}

#[tokio::test]
async fn test_live_stalled_stream() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server
        .mock("/stalled.m3u8", media_playlist(0, None, "{}.ts", false))
        .await;
    for i in 0..4 {
        server.mock(&format!("/{i}.ts"), vec![i as u8; 8]).await;
    }

    let options = StreamOptions::default().with_max_stalled_refreshes(1);
    let mut reader = session(options)
        .stream(format!("{}/stalled.m3u8", server.uri()).parse()?)
        .open()
        .await?;

    let result = read_all(&mut reader).await;
    assert!(matches!(
        result,
        Err(iori_stream::IoriError::StalledStream(2))
    ));
    assert_eq!(reader.state(), SequencerState::Failed);

    Ok(())
}

#[tokio::test]
async fn test_live_close_stops_polling() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server
        .mock("/live.m3u8", media_playlist(0, None, "{}.ts", false))
        .await;
    for i in 0..4 {
        Mock::given(method("GET"))
            .and(path(format!("/{i}.ts")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 8])
                    .set_delay(Duration::from_secs(10)),
            )
            .mount(&server)
            .await;
    }

    let mut reader = session(StreamOptions::default())
        .stream(format!("{}/live.m3u8", server.uri()).parse()?)
        .open()
        .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = tokio::time::Instant::now();
    reader.close();
    reader.close();
    assert!(reader.read(8192).await?.is_empty());
    assert!(started.elapsed() < Duration::from_secs(1));

    // no playlist reload after close
    let requests = server.received_requests().await.unwrap_or_default();
    let loads = |requests: &[wiremock::Request]| {
        requests
            .iter()
            .filter(|r| r.url.path() == "/live.m3u8")
            .count()
    };
    let before = loads(&requests);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(loads(&requests), before);

    Ok(())
}
