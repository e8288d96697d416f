//! Audio capture module
//!
//! Microphone input capture and WAV file writing. Uses CPAL for capture and
//! hound for WAV encoding; playback lives in `crate::player`.

pub mod recorder;

pub use recorder::{AudioError, AudioRecorder, RecordingHandle};
