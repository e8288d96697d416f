//! Microphone capture using CPAL, written to 16-bit WAV via hound
//!
//! A cpal `Stream` is not `Send`, so each recording runs on a dedicated
//! capture thread that owns the stream and the WAV writer. The returned
//! `RecordingHandle` talks to that thread over channels and is safe to stash
//! in async state.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, StreamConfig};
use hound::{WavSpec, WavWriter};
use uuid::Uuid;

const READY_TIMEOUT: Duration = Duration::from_secs(5);

type WavWriterHandle = Arc<Mutex<Option<WavWriter<std::io::BufWriter<std::fs::File>>>>>;

/// Errors that can occur while acquiring or releasing the capture resource.
#[derive(Debug, Clone)]
pub enum AudioError {
    PermissionDenied,
    NoInputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
    FileCreationFailed(String),
    FinalizeFailed(String),
    CaptureThreadGone,
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::PermissionDenied => write!(f, "Microphone access denied"),
            AudioError::NoInputDevice => write!(f, "No audio input device found"),
            AudioError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            AudioError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            AudioError::FileCreationFailed(e) => write!(f, "Failed to create WAV file: {}", e),
            AudioError::FinalizeFailed(e) => write!(f, "Failed to finalize WAV file: {}", e),
            AudioError::CaptureThreadGone => write!(f, "Capture thread exited unexpectedly"),
        }
    }
}

impl std::error::Error for AudioError {}

enum CaptureCommand {
    Finish,
    Discard,
}

/// Handle to an in-flight recording. Must be consumed with `finish` (keep the
/// WAV) or `discard` (stop and delete the partial file).
pub struct RecordingHandle {
    cmd_tx: SyncSender<CaptureCommand>,
    done_rx: Receiver<Result<(), AudioError>>,
    wav_path: PathBuf,
}

impl RecordingHandle {
    pub fn wav_path(&self) -> &Path {
        &self.wav_path
    }

    /// Stop the stream and finalize the WAV file.
    pub fn finish(self) -> Result<PathBuf, AudioError> {
        self.cmd_tx
            .send(CaptureCommand::Finish)
            .map_err(|_| AudioError::CaptureThreadGone)?;
        self.done_rx
            .recv()
            .map_err(|_| AudioError::CaptureThreadGone)??;
        log::info!("Recording finalized: {:?}", self.wav_path);
        Ok(self.wav_path)
    }

    /// Stop the stream and delete the partial file. Best effort; the partial
    /// clip is never saved on this path.
    pub fn discard(self) {
        if self.cmd_tx.send(CaptureCommand::Discard).is_ok() {
            let _ = self.done_rx.recv();
        }
        match std::fs::remove_file(&self.wav_path) {
            Ok(()) => log::info!("Discarded partial recording {:?}", self.wav_path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {:?}: {}", self.wav_path, e),
        }
    }
}

/// Audio recorder bound to the default input device.
pub struct AudioRecorder;

impl AudioRecorder {
    /// Fails early when no input device is present; stream and permission
    /// errors only show up once a capture is started.
    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AudioError::NoInputDevice)?;
        log::info!("Using audio input device: {:?}", device.name());
        Ok(Self)
    }

    /// Start capturing into `{tmp_dir}/capture_{session}.wav`. The permanent
    /// name and location are assigned when the recording is stopped.
    pub fn start(&self, session: Uuid, tmp_dir: &Path) -> Result<RecordingHandle, AudioError> {
        std::fs::create_dir_all(tmp_dir)
            .map_err(|e| AudioError::FileCreationFailed(e.to_string()))?;
        let wav_path = tmp_dir.join(format!("capture_{}.wav", session));

        let (ready_tx, ready_rx) = sync_channel::<Result<(), AudioError>>(1);
        let (cmd_tx, cmd_rx) = sync_channel::<CaptureCommand>(1);
        let (done_tx, done_rx) = sync_channel::<Result<(), AudioError>>(1);

        let thread_path = wav_path.clone();
        std::thread::spawn(move || run_capture(thread_path, ready_tx, cmd_rx, done_tx));

        match ready_rx.recv_timeout(READY_TIMEOUT) {
            Ok(Ok(())) => {
                log::info!("Recording started: {:?}", wav_path);
                Ok(RecordingHandle {
                    cmd_tx,
                    done_rx,
                    wav_path,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::StreamCreationFailed(
                "capture thread did not report readiness".to_string(),
            )),
        }
    }
}

/// Body of the capture thread: owns the stream and writer for one recording.
fn run_capture(
    wav_path: PathBuf,
    ready_tx: SyncSender<Result<(), AudioError>>,
    cmd_rx: Receiver<CaptureCommand>,
    done_tx: SyncSender<Result<(), AudioError>>,
) {
    let setup = (|| {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AudioError::NoInputDevice)?;
        let supported = device
            .default_input_config()
            .map_err(|_| AudioError::NoSupportedConfig)?;

        log::info!(
            "Audio config: {} Hz, {} channels, {:?}",
            supported.sample_rate().0,
            supported.channels(),
            supported.sample_format()
        );

        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();

        let spec = WavSpec {
            channels: config.channels,
            sample_rate: config.sample_rate.0,
            bits_per_sample: 16, // always write 16-bit PCM
            sample_format: hound::SampleFormat::Int,
        };

        let writer = WavWriter::create(&wav_path, spec)
            .map_err(|e| AudioError::FileCreationFailed(e.to_string()))?;
        let writer: WavWriterHandle = Arc::new(Mutex::new(Some(writer)));

        let stream = build_stream(&device, &config, sample_format, writer.clone())?;
        stream
            .play()
            .map_err(|e| classify_stream_error(&e.to_string()))?;

        Ok((stream, writer))
    })();

    let (stream, writer) = match setup {
        Ok(parts) => parts,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));

    // Block until the handle asks us to stop, or is dropped.
    let cmd = cmd_rx.recv().unwrap_or(CaptureCommand::Discard);
    drop(stream);

    let finalize = {
        let mut guard = writer.lock().unwrap_or_else(|p| p.into_inner());
        match guard.take() {
            Some(w) => w
                .finalize()
                .map_err(|e| AudioError::FinalizeFailed(e.to_string())),
            None => Ok(()),
        }
    };

    match cmd {
        CaptureCommand::Finish => {
            let _ = done_tx.send(finalize);
        }
        CaptureCommand::Discard => {
            let _ = std::fs::remove_file(&wav_path);
            let _ = done_tx.send(Ok(()));
        }
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    writer: WavWriterHandle,
) -> Result<cpal::Stream, AudioError> {
    let err_fn = |err| log::error!("Audio stream error: {}", err);

    match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(device, config, writer, err_fn),
        SampleFormat::U16 => build_stream_typed::<u16>(device, config, writer, err_fn),
        SampleFormat::F32 => build_stream_typed::<f32>(device, config, writer, err_fn),
        _ => Err(AudioError::NoSupportedConfig),
    }
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    writer: WavWriterHandle,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mut guard = match writer.lock() {
                    Ok(g) => g,
                    Err(_) => return,
                };
                if let Some(ref mut w) = *guard {
                    for &sample in data {
                        if w.write_sample(sample_to_i16(sample)).is_err() {
                            log::error!("Failed to write sample");
                            break;
                        }
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| classify_stream_error(&e.to_string()))
}

/// Map a stream creation/start failure onto the error taxonomy. Capture
/// permission problems show up as backend-specific messages on desktop.
fn classify_stream_error(message: &str) -> AudioError {
    let lowered = message.to_lowercase();
    if lowered.contains("permission") || lowered.contains("denied") || lowered.contains("access") {
        AudioError::PermissionDenied
    } else {
        AudioError::StreamCreationFailed(message.to_string())
    }
}

/// Convert any sample type to i16 for WAV writing.
fn sample_to_i16<T>(sample: T) -> i16
where
    T: cpal::Sample,
    f32: FromSample<T>,
{
    let f32_sample = f32::from_sample(sample);
    let clamped = f32_sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_to_i16() {
        assert_eq!(sample_to_i16(0.0f32), 0);
        assert_eq!(sample_to_i16(1.0f32), i16::MAX);
        assert_eq!(sample_to_i16(-1.0f32), -i16::MAX);
        assert_eq!(sample_to_i16(2.0f32), i16::MAX);
        assert_eq!(sample_to_i16(-2.0f32), -i16::MAX);
    }

    #[test]
    fn stream_errors_mentioning_permissions_classify_as_denied() {
        assert!(matches!(
            classify_stream_error("Operation not permitted: access denied by OS"),
            AudioError::PermissionDenied
        ));
        assert!(matches!(
            classify_stream_error("ALSA function call failed"),
            AudioError::StreamCreationFailed(_)
        ));
    }

    #[test]
    fn error_display_is_user_readable() {
        assert!(AudioError::PermissionDenied.to_string().contains("denied"));
        assert!(AudioError::NoInputDevice
            .to_string()
            .contains("input device"));
        assert!(AudioError::FinalizeFailed("disk full".into())
            .to_string()
            .contains("disk full"));
    }
}
