//! Encoder process adapter.
//!
//! Turns "stream this asset for N seconds to this endpoint" into a concrete
//! encoder command line, runs it as a child process and reports a definite
//! outcome without ever raising.

mod ffmpeg;
mod invocation;
mod process;
mod traits;

pub use ffmpeg::{FfmpegEncoder, FfmpegEncoderConfig};
pub use invocation::{
    EncoderInvocation, EncoderProfile, PlaybackMode, SegmentDuration, SegmentRequest,
    escape_drawtext,
};
pub use process::{ProcessSettings, run_to_completion};
pub use traits::{Encoder, EncoderOutcome};
