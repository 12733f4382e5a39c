mod failure;
mod live;

use std::time::Duration;

use iori_stream::{HttpClient, HlsSession, RetryPolicy, StreamOptions, StreamReader};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const MEDIA_SEQUENCE: u64 = 1651;

pub fn master_playlist() -> &'static str {
    r#"
#EXTM3U
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID="720p30",NAME="720p",AUTOSELECT=YES,DEFAULT=YES
#EXT-X-STREAM-INF:PROGRAM-ID=1,BANDWIDTH=2299652,RESOLUTION=1280x720,CODECS="avc1.77.31,mp4a.40.2",VIDEO="720p30"
720p.m3u8
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID="720p30",NAME="720p",AUTOSELECT=YES,DEFAULT=YES
#EXT-X-STREAM-INF:PROGRAM-ID=1,BANDWIDTH=2299652,RESOLUTION=1280x720,CODECS="avc1.77.31,mp4a.40.2",VIDEO="720p30"
720p_alt.m3u8
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID="480p30",NAME="480p",AUTOSELECT=YES,DEFAULT=YES
#EXT-X-STREAM-INF:PROGRAM-ID=1,BANDWIDTH=1354652,RESOLUTION=852x480,CODECS="avc1.77.31,mp4a.40.2",VIDEO="480p30"
480p.m3u8
#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID="chunked",NAME="1080p (source)",AUTOSELECT=YES,DEFAULT=YES
#EXT-X-STREAM-INF:PROGRAM-ID=1,BANDWIDTH=3982010,RESOLUTION=1920x1080,CODECS="avc1.4D4029,mp4a.40.2",VIDEO="chunked"
playlist.m3u8
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID="audio_only",NAME="audio_only",AUTOSELECT=YES,DEFAULT=NO,LANGUAGE="en"
#EXT-X-STREAM-INF:PROGRAM-ID=1,BANDWIDTH=90145,CODECS="mp4a.40.2",VIDEO="audio_only"
audio_only.m3u8
"#
}

/// A media playlist of four one second segments named after `template`.
pub fn media_playlist(
    media_sequence: u64,
    iv: Option<&[u8; 16]>,
    template: &str,
    end_list: bool,
) -> String {
    let mut playlist = format!(
        "#EXTM3U
#EXT-X-VERSION:5
#EXT-X-TARGETDURATION:1
#ID3-EQUIV-TDTG:2018-01-01T18:20:05
#EXT-X-MEDIA-SEQUENCE:{media_sequence}
#EXT-X-TWITCH-ELAPSED-SECS:3367.800
"
    );
    if let Some(iv) = iv {
        playlist += &format!(
            "#EXT-X-KEY:METHOD=AES-128,URI=\"encryption_key.key\",IV=0x{},KEYFORMAT=identity,KEYFORMATVERSIONS=1\n",
            hex::encode(iv)
        );
    }
    for i in 0..4 {
        playlist += &format!("#EXTINF:1.000,\n{}\n", template.replace("{}", &i.to_string()));
    }
    if end_list {
        playlist += "#EXT-X-ENDLIST\n";
    }
    playlist
}

trait HlsMock {
    async fn mock<B>(&self, mock_path: &str, body: B) -> &Self
    where
        B: Into<Vec<u8>>;

    /// Serve `body` for the first `times` requests only.
    async fn mock_times<B>(&self, mock_path: &str, body: B, times: u64) -> &Self
    where
        B: Into<Vec<u8>>;
}

impl HlsMock for MockServer {
    async fn mock<B>(&self, mock_path: &str, body: B) -> &Self
    where
        B: Into<Vec<u8>>,
    {
        Mock::given(method("GET"))
            .and(path(mock_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(self)
            .await;
        self
    }

    async fn mock_times<B>(&self, mock_path: &str, body: B, times: u64) -> &Self
    where
        B: Into<Vec<u8>>,
    {
        Mock::given(method("GET"))
            .and(path(mock_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .up_to_n_times(times)
            .mount(self)
            .await;
        self
    }
}

pub fn session(options: StreamOptions) -> HlsSession {
    let options = options.with_retry(RetryPolicy::new(3, Duration::from_millis(10)));
    HlsSession::new(HttpClient::default(), options)
}

/// Read the stream in 8 KiB pieces until it ends.
pub async fn read_all(reader: &mut StreamReader) -> iori_stream::IoriResult<Vec<u8>> {
    let mut data = Vec::new();
    loop {
        let bytes = reader.read(8192).await?;
        if bytes.is_empty() {
            return Ok(data);
        }
        data.extend_from_slice(&bytes);
    }
}
