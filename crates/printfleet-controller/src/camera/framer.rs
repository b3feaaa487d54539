use bytes::{Buf, Bytes, BytesMut};

use tracing::warn;

/// Start marker of an image.
pub const JPEG_START: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE0];
/// End marker of an image.
pub const JPEG_END: [u8; 2] = [0xFF, 0xD9];

/// Size of the authentication block.
pub const AUTH_BLOCK_LEN: usize = 80;
/// Bytes buffered without a complete image before the buffer is discarded.
pub const MAX_BUFFERED_BYTES: usize = 8 * 1024 * 1024;

pub(crate) const READ_CHUNK: usize = 4096;

const AUTH_MAGIC: u32 = 0x40;
const AUTH_COMMAND: u32 = 0x3000;
const AUTH_FIELD_LEN: usize = 32;

/// Builds the block sent right after connecting to the camera.
///
/// Layout, little-endian: `0x40`, `0x3000`, two zero words, then username
/// and access code, each zero-padded (or truncated) to 32 bytes.
#[must_use]
pub fn auth_block(username: &str, access_code: &str) -> [u8; AUTH_BLOCK_LEN] {
    let mut block = [0; AUTH_BLOCK_LEN];
    block[0..4].copy_from_slice(&AUTH_MAGIC.to_le_bytes());
    block[4..8].copy_from_slice(&AUTH_COMMAND.to_le_bytes());

    let username_start = 16;
    let access_code_start = username_start + AUTH_FIELD_LEN;
    copy_padded(
        &mut block[username_start..access_code_start],
        username.as_bytes(),
    );
    copy_padded(&mut block[access_code_start..], access_code.as_bytes());

    block
}

fn copy_padded(field: &mut [u8], value: &[u8]) {
    let len = value.len().min(field.len());
    field[..len].copy_from_slice(&value[..len]);
}

/// A complete image, start and end markers included.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaFrame(Bytes);

impl std::fmt::Debug for MediaFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MediaFrame").field(&self.0.len()).finish()
    }
}

impl MediaFrame {
    /// Returns the image bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the frame and returns its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Returns the image size.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the image is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Cuts images out of an unstructured byte stream.
#[derive(Debug, Default)]
pub struct FrameExtractor {
    buffer: BytesMut,
}

impl FrameExtractor {
    /// Creates an empty [`FrameExtractor`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from the stream.
    ///
    /// When the buffer grows past [`MAX_BUFFERED_BYTES`] without yielding an
    /// image, its content is discarded.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.buffer.len() + chunk.len() > MAX_BUFFERED_BYTES {
            warn!(
                buffered = self.buffer.len(),
                "No complete image within {MAX_BUFFERED_BYTES} bytes, discarding"
            );
            self.buffer.clear();
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Extracts the first complete image.
    ///
    /// Bytes before the start marker are dropped together with the image,
    /// everything after the end marker is kept. Without a complete image
    /// the buffer is left untouched.
    pub fn next_frame(&mut self) -> Option<MediaFrame> {
        let start = find(&self.buffer, &JPEG_START)?;
        let body = start + JPEG_START.len();
        let end = body + find(&self.buffer[body..], &JPEG_END)? + JPEG_END.len();

        self.buffer.advance(start);
        Some(MediaFrame(self.buffer.split_to(end - start).freeze()))
    }

    /// Returns the number of buffered bytes.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
