/// A byte range of a remote resource, as declared by `#EXT-X-BYTERANGE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Offset of the first byte after this range.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn to_http_range(&self) -> String {
        if self.length == 0 {
            format!("bytes={}-", self.offset)
        } else {
            format!("bytes={}-{}", self.offset, self.end() - 1)
        }
    }

    /// Resolve a playlist byte range. A range without offset continues
    /// right after the previous range of the same resource.
    pub fn from_m3u8(range: &m3u8_rs::ByteRange, previous_end: Option<u64>) -> Self {
        Self {
            offset: range.offset.or(previous_end).unwrap_or(0),
            length: range.length,
        }
    }
}
