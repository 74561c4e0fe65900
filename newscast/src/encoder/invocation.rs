//! Encoder command line construction.
//!
//! One builder covers every playback mode so the modes cannot drift apart:
//! they share the output profile, the audio bed handling and the output
//! section, and differ only in their inputs and video graph.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Silent stereo source used when no music bed is available.
const SILENT_AUDIO_SOURCE: &str = "anullsrc=r=44100:cl=stereo";

/// Ticker scroll speed in pixels per second.
const TICKER_SCROLL_SPEED: u32 = 80;

/// Fixed output encoding parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderProfile {
    pub video_codec: String,
    /// Preset for static inputs.
    pub still_preset: String,
    /// Preset for moving or composited inputs.
    pub motion_preset: String,
    pub video_bitrate_kbps: u32,
    pub buffer_size_kbps: u32,
    pub pixel_format: String,
    pub frame_rate: u32,
    pub gop_size: u32,
    pub audio_codec: String,
    pub audio_bitrate_kbps: u32,
    pub audio_sample_rate: u32,
    pub output_format: String,
    /// Font used by the scrolling ticker; the encoder default when unset.
    pub ticker_font: Option<PathBuf>,
}

impl Default for EncoderProfile {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            still_preset: "ultrafast".to_string(),
            motion_preset: "veryfast".to_string(),
            video_bitrate_kbps: 4500,
            buffer_size_kbps: 9000,
            pixel_format: "yuv420p".to_string(),
            frame_rate: 30,
            gop_size: 60,
            audio_codec: "aac".to_string(),
            audio_bitrate_kbps: 128,
            audio_sample_rate: 44100,
            output_format: "flv".to_string(),
            ticker_font: Some(PathBuf::from(
                "/usr/share/fonts/truetype/dejavu/DejaVuSansMono-Bold.ttf",
            )),
        }
    }
}

/// What the segment shows.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackMode {
    /// A still image held on screen.
    SingleImage { image: PathBuf },
    /// A pre-rendered clip played in real time.
    Clip { video: PathBuf },
    /// A looping background video with a composited overlay and a
    /// scrolling ticker. Without a background the overlay alone is used.
    LoopedBackgroundWithOverlay {
        background: Option<PathBuf>,
        overlay: PathBuf,
        ticker: String,
    },
}

impl PlaybackMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SingleImage { .. } => "single_image",
            Self::Clip { .. } => "clip",
            Self::LoopedBackgroundWithOverlay { .. } => "looped_background",
        }
    }
}

/// How long the encoder should transmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentDuration {
    Bounded(Duration),
    /// Until externally terminated.
    Unbounded,
}

/// Everything needed to describe one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRequest {
    pub mode: PlaybackMode,
    /// Looped music mixed under the video; silence when `None`.
    pub audio_bed: Option<PathBuf>,
    pub duration: SegmentDuration,
    /// Destination URL, including the ingest secret.
    pub destination: String,
    /// Destination with the secret masked, used for logging.
    pub redacted_destination: String,
}

/// One encoder process launch. Immutable once built.
#[derive(Clone, PartialEq)]
pub struct EncoderInvocation {
    program: String,
    args: Vec<String>,
    audio_bed: bool,
    duration: SegmentDuration,
    destination: Option<String>,
    redacted_destination: Option<String>,
}

impl EncoderInvocation {
    /// Build the command line streaming `request` with `profile`.
    pub fn build(program: impl Into<String>, profile: &EncoderProfile, request: &SegmentRequest) -> Self {
        let mut args = vec!["-y".to_string(), "-hide_banner".to_string()];
        // Index of the audio input, which follows the video inputs.
        let audio_index;
        let mut video_args = Vec::new();

        match &request.mode {
            PlaybackMode::SingleImage { image } => {
                push_all(&mut args, ["-loop", "1", "-re", "-i"]);
                args.push(path_arg(image));
                audio_index = 1;
                video_args.extend(strings(["-map", "0:v"]));
            }
            PlaybackMode::Clip { video } => {
                push_all(&mut args, ["-re", "-i"]);
                args.push(path_arg(video));
                audio_index = 1;
                video_args.extend(strings(["-map", "0:v"]));
            }
            PlaybackMode::LoopedBackgroundWithOverlay {
                background,
                overlay,
                ticker,
            } => {
                let ticker_filter = ticker_filter(profile, ticker);
                let graph = match background {
                    Some(background) => {
                        push_all(&mut args, ["-stream_loop", "-1", "-re", "-i"]);
                        args.push(path_arg(background));
                        push_all(&mut args, ["-loop", "1", "-i"]);
                        args.push(path_arg(overlay));
                        audio_index = 2;
                        format!("[0:v][1:v]overlay=0:0[main];[main]{ticker_filter}[out]")
                    }
                    None => {
                        push_all(&mut args, ["-loop", "1", "-re", "-i"]);
                        args.push(path_arg(overlay));
                        audio_index = 1;
                        format!("[0:v]{ticker_filter}[out]")
                    }
                };
                video_args.extend(strings(["-filter_complex"]));
                video_args.push(graph);
                video_args.extend(strings(["-map", "[out]"]));
            }
        }

        // Audio bed input
        match &request.audio_bed {
            Some(music) => {
                push_all(&mut args, ["-stream_loop", "-1", "-i"]);
                args.push(path_arg(music));
            }
            None => push_all(&mut args, ["-f", "lavfi", "-i", SILENT_AUDIO_SOURCE]),
        }

        if let SegmentDuration::Bounded(duration) = request.duration {
            args.push("-t".to_string());
            args.push(format_seconds(duration));
        }

        args.extend(video_args);
        args.push("-map".to_string());
        args.push(format!("{audio_index}:a"));

        // Video encoding
        let still = matches!(request.mode, PlaybackMode::SingleImage { .. });
        args.push("-c:v".to_string());
        args.push(profile.video_codec.clone());
        args.push("-preset".to_string());
        args.push(if still {
            profile.still_preset.clone()
        } else {
            profile.motion_preset.clone()
        });
        if still {
            push_all(&mut args, ["-tune", "stillimage"]);
        }
        let bitrate = format!("{}k", profile.video_bitrate_kbps);
        args.extend([
            "-b:v".to_string(),
            bitrate.clone(),
            "-maxrate".to_string(),
            bitrate,
            "-bufsize".to_string(),
            format!("{}k", profile.buffer_size_kbps),
            "-pix_fmt".to_string(),
            profile.pixel_format.clone(),
            "-r".to_string(),
            profile.frame_rate.to_string(),
            "-g".to_string(),
            profile.gop_size.to_string(),
        ]);

        // Audio encoding
        args.extend([
            "-c:a".to_string(),
            profile.audio_codec.clone(),
            "-b:a".to_string(),
            format!("{}k", profile.audio_bitrate_kbps),
            "-ar".to_string(),
            profile.audio_sample_rate.to_string(),
        ]);

        // A clip ends with its video; stop the looped audio with it.
        if matches!(request.mode, PlaybackMode::Clip { .. }) {
            args.push("-shortest".to_string());
        }

        args.push("-f".to_string());
        args.push(profile.output_format.clone());
        args.push(request.destination.clone());

        Self {
            program: program.into(),
            args,
            audio_bed: request.audio_bed.is_some(),
            duration: request.duration,
            destination: Some(request.destination.clone()),
            redacted_destination: Some(request.redacted_destination.clone()),
        }
    }

    /// An arbitrary command line for the encoder binary, e.g. a one-shot
    /// still render. It has no stream destination.
    pub fn custom(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            audio_bed: false,
            duration: SegmentDuration::Unbounded,
            destination: None,
            redacted_destination: None,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn has_audio_bed(&self) -> bool {
        self.audio_bed
    }

    pub fn duration(&self) -> SegmentDuration {
        self.duration
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Arguments with the destination secret masked.
    pub fn redacted_args(&self) -> Vec<String> {
        match (&self.destination, &self.redacted_destination) {
            (Some(dest), Some(redacted)) => self
                .args
                .iter()
                .map(|arg| if arg == dest { redacted.clone() } else { arg.clone() })
                .collect(),
            _ => self.args.clone(),
        }
    }
}

impl fmt::Debug for EncoderInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderInvocation")
            .field("program", &self.program)
            .field("args", &self.redacted_args())
            .field("audio_bed", &self.audio_bed)
            .field("duration", &self.duration)
            .finish()
    }
}

/// Escape text for use inside a quoted drawtext `text=` value.
pub fn escape_drawtext(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("'\\''"),
            ':' => out.push_str("\\:"),
            '%' => out.push_str("\\%"),
            '\n' | '\r' => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}

fn ticker_filter(profile: &EncoderProfile, ticker: &str) -> String {
    let safe = escape_drawtext(ticker);
    let font = profile
        .ticker_font
        .as_deref()
        .map(|font| format!("fontfile={}:", path_arg(font)))
        .unwrap_or_default();
    format!(
        "drawtext=text='{safe}  ★  {safe}':{font}fontsize=28:fontcolor=white:\
         x='w-mod(t*{TICKER_SCROLL_SPEED}\\,w+tw)':y=h-45"
    )
}

fn format_seconds(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        duration.as_secs().to_string()
    } else {
        format!("{:.3}", duration.as_secs_f64())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn strings<const N: usize>(items: [&str; N]) -> [String; N] {
    items.map(str::to_string)
}

fn push_all<const N: usize>(args: &mut Vec<String>, items: [&str; N]) {
    args.extend(strings(items));
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEST: &str = "rtmp://ingest.example/live2/secret-key";

    fn request(mode: PlaybackMode, audio_bed: Option<&str>, duration: SegmentDuration) -> SegmentRequest {
        SegmentRequest {
            mode,
            audio_bed: audio_bed.map(PathBuf::from),
            duration,
            destination: DEST.to_string(),
            redacted_destination: "rtmp://ingest.example/live2/********".to_string(),
        }
    }

    fn build(req: &SegmentRequest) -> EncoderInvocation {
        EncoderInvocation::build("ffmpeg", &EncoderProfile::default(), req)
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_single_image_silent_timed() {
        let req = request(
            PlaybackMode::SingleImage {
                image: PathBuf::from("/data/frames/item_1.png"),
            },
            None,
            SegmentDuration::Bounded(Duration::from_secs(30)),
        );
        let inv = build(&req);
        let args = inv.args();

        assert_eq!(value_after(args, "-loop"), Some("1"));
        assert!(args.contains(&"/data/frames/item_1.png".to_string()));
        assert!(args.contains(&SILENT_AUDIO_SOURCE.to_string()));
        assert_eq!(value_after(args, "-t"), Some("30"));
        assert_eq!(value_after(args, "-tune"), Some("stillimage"));
        assert_eq!(value_after(args, "-preset"), Some("ultrafast"));
        assert_eq!(value_after(args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(args, "-b:v"), Some("4500k"));
        assert_eq!(value_after(args, "-pix_fmt"), Some("yuv420p"));
        assert_eq!(value_after(args, "-r"), Some("30"));
        assert_eq!(value_after(args, "-g"), Some("60"));
        assert_eq!(value_after(args, "-f"), Some("lavfi"));
        assert_eq!(args.last().map(String::as_str), Some(DEST));
        assert!(!inv.has_audio_bed());
        assert_eq!(inv.duration(), SegmentDuration::Bounded(Duration::from_secs(30)));
    }

    #[test]
    fn test_music_bed_is_looped() {
        let req = request(
            PlaybackMode::SingleImage {
                image: PathBuf::from("a.png"),
            },
            Some("/assets/music/background.mp3"),
            SegmentDuration::Bounded(Duration::from_secs(10)),
        );
        let inv = build(&req);
        let args = inv.args();

        assert!(inv.has_audio_bed());
        assert_eq!(value_after(args, "-stream_loop"), Some("-1"));
        assert!(!args.contains(&SILENT_AUDIO_SOURCE.to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "1:a"));
    }

    #[test]
    fn test_looped_background_composites_overlay_and_ticker() {
        let req = request(
            PlaybackMode::LoopedBackgroundWithOverlay {
                background: Some(PathBuf::from("/assets/video/background.mp4")),
                overlay: PathBuf::from("/data/overlay.png"),
                ticker: "Next: CVE-2024:1234".to_string(),
            },
            None,
            SegmentDuration::Unbounded,
        );
        let inv = build(&req);
        let args = inv.args();

        let graph = value_after(args, "-filter_complex").unwrap();
        assert!(graph.starts_with("[0:v][1:v]overlay=0:0[main];[main]drawtext="));
        assert!(graph.contains("CVE-2024\\:1234"));
        assert!(graph.ends_with("[out]"));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "[out]"));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "2:a"));
        assert_eq!(value_after(args, "-preset"), Some("veryfast"));
        assert!(!args.contains(&"-t".to_string()), "unbounded segments carry no duration");
        assert_eq!(inv.duration(), SegmentDuration::Unbounded);
    }

    #[test]
    fn test_overlay_without_background_falls_back() {
        let req = request(
            PlaybackMode::LoopedBackgroundWithOverlay {
                background: None,
                overlay: PathBuf::from("/data/overlay.png"),
                ticker: "ticker".to_string(),
            },
            None,
            SegmentDuration::Bounded(Duration::from_secs(30)),
        );
        let args = build(&req).args().to_vec();

        let graph = value_after(&args, "-filter_complex").unwrap();
        assert!(graph.starts_with("[0:v]drawtext="));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "1:a"));
    }

    #[test]
    fn test_clip_is_realtime_and_shortest() {
        let req = request(
            PlaybackMode::Clip {
                video: PathBuf::from("/data/segments/segment_4.mp4"),
            },
            Some("music.mp3"),
            SegmentDuration::Unbounded,
        );
        let args = build(&req).args().to_vec();

        assert_eq!(value_after(&args, "-re"), Some("-i"));
        assert!(args.contains(&"-shortest".to_string()));
    }

    #[test]
    fn test_redacted_args_hide_secret() {
        let req = request(
            PlaybackMode::SingleImage {
                image: PathBuf::from("a.png"),
            },
            None,
            SegmentDuration::Bounded(Duration::from_millis(1500)),
        );
        let inv = build(&req);

        assert!(inv.args().iter().any(|a| a.contains("secret-key")));
        assert!(!inv.redacted_args().iter().any(|a| a.contains("secret-key")));
        assert!(!format!("{inv:?}").contains("secret-key"));
        assert_eq!(value_after(inv.args(), "-t"), Some("1.500"));
    }

    #[test]
    fn test_escape_drawtext() {
        assert_eq!(escape_drawtext("it's 5:00"), "it'\\''s 5\\:00");
        assert_eq!(escape_drawtext("100%"), "100\\%");
        assert_eq!(escape_drawtext("a\nb"), "a b");
    }
}
