//! Fixed-duration ring of JPEG-compressed frames (SPEC_FULL.md §4.3).
//!
//! Owned and mutated only by the capture loop; queries take a short
//! `parking_lot::Mutex` guard and return an owned snapshot, matching the
//! single-writer/short-lock policy in SPEC_FULL.md §5.

use crate::encoder::{EncoderCommand, EncoderKind};
use crate::error::{BufferError, ClipError, Result};
use crate::frame::{BufferedFrame, Frame};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

pub struct FrameBuffer {
    frames: Mutex<VecDeque<BufferedFrame>>,
    capacity: usize,
    jpeg_quality: u8,
}

impl FrameBuffer {
    pub fn new(buffer_seconds: u32, fps: u32, jpeg_quality: u8) -> Self {
        let capacity = (buffer_seconds as usize) * (fps.max(1) as usize);
        info!(
            capacity,
            buffer_seconds, fps, "frame buffer initialized"
        );
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            jpeg_quality,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// JPEG-compress and push a frame, evicting the oldest frame FIFO-style if full
    /// (invariant 3, SPEC_FULL.md §3: count never exceeds `fps × buffer_seconds`).
    pub fn add_frame(&self, frame: &Frame) -> Result<()> {
        let jpeg_data = encode_jpeg(&frame.data, frame.width, frame.height, self.jpeg_quality)?;

        let buffered = BufferedFrame {
            timestamp: frame.timestamp,
            frame_number: frame.frame_number,
            jpeg_data: Arc::new(jpeg_data),
            width: frame.width,
            height: frame.height,
        };

        let mut frames = self.frames.lock();
        if frames.len() >= self.capacity {
            frames.pop_front();
        }
        frames.push_back(buffered);
        Ok(())
    }

    /// Inclusive scan over `[start, end]`, returned in chronological order.
    pub fn frames_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<BufferedFrame> {
        self.frames
            .lock()
            .iter()
            .filter(|f| f.timestamp >= start && f.timestamp <= end)
            .cloned()
            .collect()
    }

    pub fn frames_before(&self, ts: DateTime<Utc>, seconds: f64) -> Vec<BufferedFrame> {
        let start = ts - chrono::Duration::milliseconds((seconds * 1000.0) as i64);
        self.frames_in_range(start, ts)
    }

    pub fn recent(&self, seconds: f64) -> Vec<BufferedFrame> {
        let frames = self.frames.lock();
        let Some(newest) = frames.back().map(|f| f.timestamp) else {
            return Vec::new();
        };
        drop(frames);
        let start = newest - chrono::Duration::milliseconds((seconds * 1000.0) as i64);
        self.frames_in_range(start, newest)
    }

    pub fn oldest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.frames.lock().front().map(|f| f.timestamp)
    }

    pub fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.frames.lock().back().map(|f| f.timestamp)
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    /// Decode the frames in `[start, end]` and pipe them as raw BGR24 into the
    /// probed encoder, producing a standalone clip (SPEC_FULL.md §4.3, §4.6
    /// direct-from-buffer path).
    pub async fn extract_clip(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        output: &std::path::Path,
        fps: u32,
        crf: u32,
        encoder: EncoderKind,
    ) -> Result<()> {
        let frames = self.frames_in_range(start, end);
        if frames.is_empty() {
            warn!(%start, %end, "no frames found in requested range");
            return Err(ClipError::EmptyRange.into());
        }

        let (width, height) = (frames[0].width, frames[0].height);

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut cmd = EncoderCommand::raw_input_to_mp4(encoder, width, height, fps, crf, output);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        info!(count = frames.len(), ?output, "extracting clip from buffer");

        let mut child = cmd
            .spawn()
            .map_err(|e| crate::error::RecorderError::Spawn(e.to_string()))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| crate::error::RecorderError::Spawn("no stdin".to_string()))?;

        for buffered in &frames {
            let raw = buffered.decode_bgr24()?;
            stdin.write_all(&raw).await?;
        }
        drop(stdin);

        let status = child.wait().await?;
        if !status.success() {
            return Err(ClipError::ExtractionFailed {
                details: format!("ffmpeg exited with {:?}", status.code()),
            }
            .into());
        }

        info!(?output, "clip extracted from buffer");
        Ok(())
    }
}

fn encode_jpeg(raw_bgr24: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    use image::codecs::jpeg::JpegEncoder;
    use image::ColorType;

    let mut rgb = raw_bgr24.to_vec();
    for px in rgb.chunks_exact_mut(3) {
        px.swap(0, 2);
    }

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode(&rgb, width, height, ColorType::Rgb8)
        .map_err(|e| BufferError::EncodeFailed {
            details: e.to_string(),
        })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use chrono::Duration as ChronoDuration;

    fn solid_frame(n: u64, ts: DateTime<Utc>) -> Frame {
        Frame::new(vec![10u8; 4 * 4 * 3], 4, 4, n, ts)
    }

    #[test]
    fn push_and_length() {
        let buf = FrameBuffer::new(1, 2, 80); // capacity 2
        let t0 = Utc::now();
        buf.add_frame(&solid_frame(0, t0)).unwrap();
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let buf = FrameBuffer::new(1, 2, 80); // capacity 2
        let t0 = Utc::now();
        buf.add_frame(&solid_frame(0, t0)).unwrap();
        buf.add_frame(&solid_frame(1, t0 + ChronoDuration::seconds(1))).unwrap();
        buf.add_frame(&solid_frame(2, t0 + ChronoDuration::seconds(2))).unwrap();
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.oldest_timestamp().unwrap(), t0 + ChronoDuration::seconds(1));
    }

    #[test]
    fn range_query_is_inclusive_and_chronological() {
        let buf = FrameBuffer::new(10, 1, 80);
        let t0 = Utc::now();
        for i in 0..5 {
            buf.add_frame(&solid_frame(i, t0 + ChronoDuration::seconds(i as i64)))
                .unwrap();
        }
        let got = buf.frames_in_range(t0 + ChronoDuration::seconds(1), t0 + ChronoDuration::seconds(3));
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].frame_number, 1);
        assert_eq!(got[2].frame_number, 3);
    }

    #[test]
    fn recent_uses_newest_timestamp_as_anchor() {
        let buf = FrameBuffer::new(10, 1, 80);
        let t0 = Utc::now();
        for i in 0..5 {
            buf.add_frame(&solid_frame(i, t0 + ChronoDuration::seconds(i as i64)))
                .unwrap();
        }
        let got = buf.recent(2.0);
        assert_eq!(got.len(), 3); // t+2, t+3, t+4
    }

    #[test]
    fn clear_empties_buffer() {
        let buf = FrameBuffer::new(10, 1, 80);
        buf.add_frame(&solid_frame(0, Utc::now())).unwrap();
        buf.clear();
        assert!(buf.is_empty());
    }
}
