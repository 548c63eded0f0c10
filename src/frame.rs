use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A decoded BGR frame read from the capture source (SPEC_FULL.md §3 Frame).
///
/// Transient; owned by the capture reader until handed to the buffer, the state
/// machine's detector call, or the visit recorder. Pixel data is `Arc`-shared so the
/// same decode can be pushed to the buffer and the detector without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub frame_number: u64,
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, frame_number: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            data: Arc::new(data),
            width,
            height,
            frame_number,
            timestamp,
        }
    }

    /// Expected length of a raw BGR24 buffer at this frame's declared dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// A JPEG-compressed frame retained in the rolling frame buffer (SPEC_FULL.md §3
/// BufferedFrame). Lives in the ring for at most `buffer_seconds`.
#[derive(Debug, Clone)]
pub struct BufferedFrame {
    pub timestamp: DateTime<Utc>,
    pub frame_number: u64,
    pub jpeg_data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

impl BufferedFrame {
    /// Decode back to a raw BGR24 buffer for re-encoding (clip extraction paths).
    pub fn decode_bgr24(&self) -> crate::error::Result<Vec<u8>> {
        use image::codecs::jpeg::JpegDecoder;
        use image::ImageDecoder;

        let decoder = JpegDecoder::new(std::io::Cursor::new(self.jpeg_data.as_slice()))
            .map_err(|e| crate::error::BufferError::DecodeFailed {
                details: e.to_string(),
            })?;
        let mut buf = vec![0u8; decoder.total_bytes() as usize];
        decoder
            .read_image(&mut buf)
            .map_err(|e| crate::error::BufferError::DecodeFailed {
                details: e.to_string(),
            })?;
        // image crate decodes JPEG to RGB8; the encoder pipe expects BGR24.
        for px in buf.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        Ok(buf)
    }
}

/// A single detector result (SPEC_FULL.md §3 Detection). The detector itself is out
/// of scope; this is the shape the core consumes from it.
#[derive(Debug, Clone)]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f64,
    pub bbox: (f32, f32, f32, f32),
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_expected_len_matches_dimensions() {
        let frame = Frame::new(vec![0u8; 12], 2, 2, 0, Utc::now());
        assert_eq!(frame.expected_len(), 12);
    }
}
