use std::{collections::HashMap, sync::Arc};

use m3u8_rs::{AlternativeMediaType, MasterPlaylist, MediaPlaylist};
use url::Url;

use crate::{
    error::{IoriError, IoriResult},
    util::range::ByteRange,
};

#[derive(Debug, Clone)]
pub enum Playlist {
    Master(MasterDocument),
    Media(MediaDocument),
}

/// Renditions declared by a master playlist, in document order.
#[derive(Debug, Clone, Default)]
pub struct MasterDocument {
    pub variants: Vec<VariantEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantEntry {
    pub name: String,
    pub bandwidth: u64,
    pub group_id: Option<String>,
    pub media_playlist_url: Url,
    pub codecs: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MediaDocument {
    /// Seconds
    pub target_duration: f64,
    pub media_sequence_start: u64,
    pub segments: Vec<Segment>,
    pub end_of_stream: bool,
}

impl MediaDocument {
    pub fn last_sequence(&self) -> Option<u64> {
        self.segments.last().map(|s| s.sequence_number)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub sequence_number: u64,
    pub uri: Url,
    /// Seconds
    pub duration: f64,
    pub byte_range: Option<ByteRange>,
    pub encryption: Option<Encryption>,
    pub discontinuity: bool,
    /// Media initialization section declared by `#EXT-X-MAP`.
    pub init_section: Option<Arc<InitSection>>,
}

impl Segment {
    /// The explicit IV, or the sequence number as a 128-bit big-endian integer.
    pub fn iv(&self) -> Option<[u8; 16]> {
        self.encryption.as_ref().map(|encryption| {
            encryption
                .iv
                .unwrap_or_else(|| (self.sequence_number as u128).to_be_bytes())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionMethod {
    Aes128,
    SampleAes,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encryption {
    pub method: EncryptionMethod,
    pub key_uri: Url,
    pub iv: Option<[u8; 16]>,
}

impl Encryption {
    fn from_key(key: &KeyTag, base: &Url) -> IoriResult<Option<Self>> {
        let method = match key.method.as_str() {
            "NONE" => return Ok(None),
            "AES-128" => EncryptionMethod::Aes128,
            "SAMPLE-AES" => EncryptionMethod::SampleAes,
            other => EncryptionMethod::Other(other.to_string()),
        };
        let uri = key.uri.as_deref().ok_or_else(|| {
            IoriError::MalformedPlaylist("#EXT-X-KEY without URI attribute".to_string())
        })?;
        let iv = key.iv.as_deref().map(parse_iv).transpose()?;

        Ok(Some(Self {
            method,
            key_uri: base.join(uri)?,
            iv,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSection {
    pub uri: Url,
    pub byte_range: Option<ByteRange>,
}

fn parse_iv(iv: &str) -> IoriResult<[u8; 16]> {
    let hex_iv = iv
        .strip_prefix("0x")
        .or_else(|| iv.strip_prefix("0X"))
        .unwrap_or(iv);
    let mut bytes = [0u8; 16];
    hex::decode_to_slice(hex_iv, &mut bytes)
        .map_err(|e| IoriError::MalformedPlaylist(format!("invalid IV {iv}: {e}")))?;
    Ok(bytes)
}

/// Parse playlist text fetched from `url`. Relative URIs are resolved against `url`.
pub fn parse_playlist(text: &str, url: &Url) -> IoriResult<Playlist> {
    let text = text.trim_start_matches('\u{feff}').trim_start();
    if !text.starts_with("#EXTM3U") {
        return Err(IoriError::MalformedPlaylist(
            "missing #EXTM3U header".to_string(),
        ));
    }

    let mut has_variants = false;
    let mut has_segments = false;
    let mut has_target_duration = false;
    for line in text.lines().map(str::trim) {
        if line.starts_with("#EXT-X-STREAM-INF") {
            has_variants = true;
        } else if line.starts_with("#EXTINF") {
            has_segments = true;
        } else if line.starts_with("#EXT-X-TARGETDURATION") {
            has_target_duration = true;
        }
    }

    if has_variants {
        let playlist = m3u8_rs::parse_master_playlist_res(text.as_bytes()).map_err(|_| {
            IoriError::MalformedPlaylist("invalid master playlist".to_string())
        })?;
        Ok(Playlist::Master(master_document(playlist, url)?))
    } else if has_segments || has_target_duration {
        if !has_target_duration {
            return Err(IoriError::MalformedPlaylist(
                "missing #EXT-X-TARGETDURATION".to_string(),
            ));
        }
        let playlist = m3u8_rs::parse_media_playlist_res(text.as_bytes()).map_err(|_| {
            IoriError::MalformedPlaylist("invalid media playlist".to_string())
        })?;
        Ok(Playlist::Media(media_document(playlist, text, url)?))
    } else {
        Err(IoriError::MalformedPlaylist(
            "neither variant streams nor segments found".to_string(),
        ))
    }
}

pub fn parse_media_playlist(text: &str, url: &Url) -> IoriResult<MediaDocument> {
    match parse_playlist(text, url)? {
        Playlist::Media(document) => Ok(document),
        Playlist::Master(_) => Err(IoriError::MalformedPlaylist(
            "expected a media playlist, found a master playlist".to_string(),
        )),
    }
}

fn master_document(playlist: MasterPlaylist, url: &Url) -> IoriResult<MasterDocument> {
    // GROUP-ID -> NAME, video renditions take precedence
    let mut group_names: HashMap<&str, &str> = HashMap::new();
    for media in playlist.alternatives.iter() {
        if media.name.is_empty() {
            continue;
        }
        let is_video = media.media_type == AlternativeMediaType::Video;
        if is_video || !group_names.contains_key(media.group_id.as_str()) {
            group_names.insert(media.group_id.as_str(), media.name.as_str());
        }
    }

    let mut variants = Vec::with_capacity(playlist.variants.len());
    for variant in playlist.variants.iter().filter(|v| !v.is_i_frame) {
        let group_id = variant.video.clone().or_else(|| variant.audio.clone());
        let name = group_id
            .as_deref()
            .and_then(|group| group_names.get(group))
            .map(|name| name.to_string())
            .or_else(|| variant.resolution.map(|r| format!("{}p", r.height)))
            .unwrap_or_else(|| format!("{}k", variant.bandwidth / 1000));

        variants.push(VariantEntry {
            name,
            bandwidth: variant.bandwidth,
            group_id,
            media_playlist_url: url.join(&variant.uri)?,
            codecs: variant.codecs.clone(),
        });
    }

    Ok(MasterDocument { variants })
}

/// `#EXT-X-KEY` tags by the index of the segment they precede.
///
/// m3u8-rs drops key tags carrying some optional attributes (such as an unquoted
/// `KEYFORMAT=identity`), so they are read from the playlist text instead.
fn key_tags(text: &str) -> IoriResult<(HashMap<usize, KeyTag>, usize)> {
    let mut keys = HashMap::new();
    let mut segment_index = 0;
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(attributes) = line.strip_prefix("#EXT-X-KEY:") {
            let key = KeyTag::parse(attributes)?;
            // keys of other key systems cannot decrypt AES-128
            if key.keyformat.as_deref().map_or(true, |format| format == "identity") {
                keys.insert(segment_index, key);
            }
        } else if !line.starts_with('#') {
            segment_index += 1;
        }
    }
    Ok((keys, segment_index))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct KeyTag {
    method: String,
    uri: Option<String>,
    iv: Option<String>,
    keyformat: Option<String>,
}

impl KeyTag {
    fn parse(attributes: &str) -> IoriResult<Self> {
        let mut method = None;
        let mut key = Self {
            method: String::new(),
            uri: None,
            iv: None,
            keyformat: None,
        };
        for (name, value) in split_attributes(attributes) {
            match name {
                "METHOD" => method = Some(value.to_string()),
                "URI" => key.uri = Some(value.to_string()),
                "IV" => key.iv = Some(value.to_string()),
                "KEYFORMAT" => key.keyformat = Some(value.to_string()),
                _ => {}
            }
        }

        key.method = method.ok_or_else(|| {
            IoriError::MalformedPlaylist("#EXT-X-KEY without METHOD attribute".to_string())
        })?;
        Ok(key)
    }
}

/// Split an attribute list into `(name, value)` pairs, unquoting quoted values.
fn split_attributes(attributes: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    let mut rest = attributes.trim();
    while !rest.is_empty() {
        let Some((name, after)) = rest.split_once('=') else {
            break;
        };
        let (value, after) = match after.strip_prefix('"') {
            Some(quoted) => match quoted.split_once('"') {
                Some((value, after)) => (value, after),
                None => (quoted, ""),
            },
            None => after.split_once(',').map_or((after, ""), |(v, a)| (v, a)),
        };
        pairs.push((name.trim(), value.trim()));
        rest = after.trim_start_matches(',').trim_start();
    }
    pairs
}

fn media_document(playlist: MediaPlaylist, text: &str, url: &Url) -> IoriResult<MediaDocument> {
    let (keys, uri_lines) = key_tags(text)?;
    if uri_lines != playlist.segments.len() {
        return Err(IoriError::MalformedPlaylist(format!(
            "{uri_lines} segment URIs found, but {} segments parsed",
            playlist.segments.len()
        )));
    }

    let mut encryption = None;
    let mut init_section = None;
    let mut previous_range: Option<(Url, u64)> = None;

    let mut segments = Vec::with_capacity(playlist.segments.len());
    for (i, segment) in playlist.segments.iter().enumerate() {
        if let Some(key) = keys.get(&i) {
            encryption = Encryption::from_key(key, url)?;
        }

        if let Some(map) = &segment.map {
            init_section = Some(Arc::new(InitSection {
                uri: url.join(&map.uri)?,
                byte_range: map
                    .byte_range
                    .as_ref()
                    .map(|range| ByteRange::from_m3u8(range, None)),
            }));
        }

        let uri = url.join(&segment.uri)?;
        let byte_range = segment.byte_range.as_ref().map(|range| {
            let previous_end = previous_range
                .as_ref()
                .filter(|(previous_uri, _)| previous_uri == &uri)
                .map(|(_, end)| *end);
            ByteRange::from_m3u8(range, previous_end)
        });
        previous_range = byte_range.map(|range| (uri.clone(), range.end()));

        segments.push(Segment {
            sequence_number: playlist.media_sequence + i as u64,
            uri,
            duration: segment.duration as f64,
            byte_range,
            encryption: encryption.clone(),
            discontinuity: segment.discontinuity,
            init_section: init_section.clone(),
        });
    }

    Ok(MediaDocument {
        target_duration: playlist.target_duration as f64,
        media_sequence_start: playlist.media_sequence,
        segments,
        end_of_stream: playlist.end_list,
    })
}
