//! Hardware encoder probing and the shared ffmpeg command builder.
//!
//! Grounded in the original `detect_hardware_encoder` probe order and the
//! encoder-flag blocks duplicated across the visit recorder and the buffer
//! extractor — SPEC_FULL.md §9 calls for a single command builder kept in sync,
//! which is what `EncoderCommand` below is.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// A probed hardware (or software) H.264 encoder, in ffmpeg `-c:v` terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderKind {
    VideoToolbox,
    Nvenc,
    Vaapi,
    QuickSync,
    Amf,
    SoftwareX264,
}

impl EncoderKind {
    fn ffmpeg_codec_name(&self) -> &'static str {
        match self {
            EncoderKind::VideoToolbox => "h264_videotoolbox",
            EncoderKind::Nvenc => "h264_nvenc",
            EncoderKind::Vaapi => "h264_vaapi",
            EncoderKind::QuickSync => "h264_qsv",
            EncoderKind::Amf => "h264_amf",
            EncoderKind::SoftwareX264 => "libx264",
        }
    }

    /// Candidates in probe order (SPEC_FULL.md §4.1).
    fn probe_order() -> [EncoderKind; 6] {
        [
            EncoderKind::VideoToolbox,
            EncoderKind::Nvenc,
            EncoderKind::Vaapi,
            EncoderKind::QuickSync,
            EncoderKind::Amf,
            EncoderKind::SoftwareX264,
        ]
    }
}

/// Encoder discovery result, cached for the process lifetime unless `verbose` bypasses it.
pub struct EncoderProbe {
    cached: tokio::sync::OnceCell<EncoderKind>,
}

impl EncoderProbe {
    pub fn new() -> Self {
        Self {
            cached: tokio::sync::OnceCell::new(),
        }
    }

    /// Returns the first encoder candidate that cleanly completes a 1-second
    /// synthetic test encode to a null sink. Falls back to software libx264,
    /// which is always assumed available once ffmpeg itself is present.
    pub async fn detect(&self, verbose: bool) -> EncoderKind {
        if !verbose {
            if let Some(kind) = self.cached.get() {
                return *kind;
            }
        }

        for candidate in EncoderKind::probe_order() {
            if candidate == EncoderKind::SoftwareX264 {
                break;
            }
            if Self::probe_candidate(candidate).await {
                info!(encoder = ?candidate, "hardware encoder probe succeeded");
                let _ = self.cached.set(candidate);
                return candidate;
            }
            debug!(encoder = ?candidate, "hardware encoder probe failed, trying next");
        }

        info!("falling back to software libx264 encoder");
        let _ = self.cached.set(EncoderKind::SoftwareX264);
        EncoderKind::SoftwareX264
    }

    async fn probe_candidate(kind: EncoderKind) -> bool {
        let mut cmd = Command::new("ffmpeg");
        cmd.args([
            "-f",
            "lavfi",
            "-i",
            "color=c=black:s=64x64:d=1",
            "-c:v",
            kind.ffmpeg_codec_name(),
            "-frames:v",
            "25",
            "-f",
            "null",
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

        match timeout(Duration::from_secs(10), cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                warn!("failed to spawn ffmpeg for encoder probe: {}", e);
                false
            }
            Err(_) => {
                warn!(encoder = ?kind, "encoder probe timed out");
                false
            }
        }
    }
}

impl Default for EncoderProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the ffmpeg argv for a raw-BGR24-stdin → MP4/H.264 encode, keyed off the
/// probed encoder. Shared by the visit recorder and the buffer-based extractor so
/// the encoder-flag block never drifts between the two call sites.
pub struct EncoderCommand;

impl EncoderCommand {
    /// `ffmpeg` invocation that reads raw BGR24 frames from stdin and writes an
    /// MP4/H.264 file with `+faststart`, with codec-specific flags per `kind`.
    pub fn raw_input_to_mp4(
        kind: EncoderKind,
        width: u32,
        height: u32,
        fps: u32,
        crf: u32,
        output: &std::path::Path,
    ) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.args([
            "-y",
            "-f",
            "rawvideo",
            "-vcodec",
            "rawvideo",
            "-s",
            &format!("{}x{}", width, height),
            "-pix_fmt",
            "bgr24",
            "-r",
            &fps.to_string(),
            "-i",
            "-",
        ]);

        match kind {
            EncoderKind::VideoToolbox => {
                let quality = ((51 - crf as i64) * 2).clamp(1, 100);
                cmd.args(["-c:v", "h264_videotoolbox", "-q:v", &quality.to_string()]);
            }
            EncoderKind::Vaapi => {
                cmd.args([
                    "-vaapi_device",
                    "/dev/dri/renderD128",
                    "-vf",
                    "format=nv12,hwupload",
                    "-c:v",
                    "h264_vaapi",
                    "-qp",
                    &crf.to_string(),
                ]);
            }
            EncoderKind::Nvenc => {
                cmd.args(["-c:v", "h264_nvenc", "-cq", &crf.to_string()]);
            }
            EncoderKind::QuickSync => {
                cmd.args(["-c:v", "h264_qsv", "-global_quality", &crf.to_string()]);
            }
            EncoderKind::Amf => {
                cmd.args(["-c:v", "h264_amf", "-qp_i", &crf.to_string()]);
            }
            EncoderKind::SoftwareX264 => {
                cmd.args([
                    "-c:v",
                    "libx264",
                    "-crf",
                    &crf.to_string(),
                    "-preset",
                    "fast",
                ]);
            }
        }

        cmd.args([
            "-pix_fmt",
            "yuv420p",
            "-profile:v",
            "baseline",
            "-movflags",
            "+faststart",
        ]);
        cmd.arg(output);
        cmd
    }

    /// Stream-copy remux of a sub-range of an existing file — no re-encode. Used
    /// for the arrival/departure sub-clips carved out of a finalized visit file.
    pub fn remux_range(
        input: &std::path::Path,
        start_offset_seconds: f64,
        duration_seconds: f64,
        output: &std::path::Path,
    ) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-y", "-ss", &format!("{:.3}", start_offset_seconds)])
            .arg("-i")
            .arg(input)
            .args(["-t", &format!("{:.3}", duration_seconds), "-c", "copy"])
            .arg(output);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_names_match_ffmpeg_conventions() {
        assert_eq!(EncoderKind::VideoToolbox.ffmpeg_codec_name(), "h264_videotoolbox");
        assert_eq!(EncoderKind::SoftwareX264.ffmpeg_codec_name(), "libx264");
    }

    #[test]
    fn probe_order_ends_in_software_fallback() {
        let order = EncoderKind::probe_order();
        assert_eq!(*order.last().unwrap(), EncoderKind::SoftwareX264);
        assert_eq!(order.len(), 6);
    }
}
