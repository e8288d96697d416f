//! Single-slot audio playback with progress reporting
//!
//! rodio's `OutputStream` is not `Send`, so playback lives on a dedicated
//! thread that owns the output device and at most one loaded source at a
//! time. Loading a new source first unloads the previous one; when a track
//! plays to its end the slot auto-unloads back to idle. Status snapshots are
//! published on a watch channel that callers subscribe to and drop freely.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use tokio::sync::watch;

/// How often the playback thread publishes a position update.
const STATUS_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug)]
pub enum PlayerError {
    DeviceUnavailable(String),
    OpenFailed(String),
    DecodeFailed(String),
}

impl std::fmt::Display for PlayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerError::DeviceUnavailable(e) => write!(f, "No audio output device: {}", e),
            PlayerError::OpenFailed(e) => write!(f, "Could not open audio file: {}", e),
            PlayerError::DecodeFailed(e) => write!(f, "Could not decode audio file: {}", e),
        }
    }
}

impl std::error::Error for PlayerError {}

/// Snapshot of the playback slot, published on every meaningful change.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatus {
    /// Loaded resource, if any.
    pub uri: Option<PathBuf>,
    pub is_playing: bool,
    pub position_millis: u64,
    pub duration_millis: u64,
    /// One-shot error text from the last failed load, cleared on the next
    /// successful toggle.
    pub error: Option<String>,
}

impl PlayerStatus {
    fn idle() -> Self {
        PlayerStatus {
            uri: None,
            is_playing: false,
            position_millis: 0,
            duration_millis: 0,
            error: None,
        }
    }

    fn failed(message: String) -> Self {
        PlayerStatus {
            error: Some(message),
            ..PlayerStatus::idle()
        }
    }

    /// Fraction played for display, hidden until the duration is known.
    pub fn progress(&self) -> Option<f64> {
        if self.duration_millis == 0 {
            return None;
        }
        Some(self.position_millis as f64 / self.duration_millis as f64)
    }
}

enum PlayerCommand {
    Toggle(PathBuf),
    Stop,
    Shutdown,
}

/// What a toggle request does to the slot.
#[derive(Debug, PartialEq, Eq)]
enum ToggleAction {
    /// The loaded resource was requested again: stop it, back to idle.
    StopSame,
    /// Unload whatever is there and load the requested resource.
    Replace,
}

fn toggle_action(current: Option<&Path>, requested: &Path) -> ToggleAction {
    if current == Some(requested) {
        ToggleAction::StopSame
    } else {
        ToggleAction::Replace
    }
}

/// Next published status for one poll tick. End of track drops the slot
/// (`false`) and publishes idle; otherwise the live snapshot goes out.
fn poll_status(finished: bool, live: PlayerStatus) -> (bool, PlayerStatus) {
    if finished {
        (false, PlayerStatus::idle())
    } else {
        (true, live)
    }
}

/// Handle to the playback thread. Dropping it shuts the thread down.
pub struct Player {
    cmd_tx: Sender<PlayerCommand>,
    status_rx: watch::Receiver<PlayerStatus>,
}

impl Player {
    /// Spawn the playback thread. The output device is opened lazily on the
    /// first toggle, so a machine without one can still browse clips.
    pub fn spawn() -> Player {
        let (cmd_tx, cmd_rx) = channel::<PlayerCommand>();
        let (status_tx, status_rx) = watch::channel(PlayerStatus::idle());

        std::thread::spawn(move || {
            let mut slot: Option<Playback> = None;

            loop {
                match cmd_rx.recv_timeout(STATUS_INTERVAL) {
                    Ok(PlayerCommand::Toggle(path)) => {
                        let action = toggle_action(slot.as_ref().map(|p| p.uri.as_path()), &path);
                        slot = None; // unload whatever was playing
                        match action {
                            ToggleAction::StopSame => {
                                let _ = status_tx.send(PlayerStatus::idle());
                            }
                            ToggleAction::Replace => match Playback::load(&path) {
                                Ok(playback) => {
                                    let _ = status_tx.send(playback.status());
                                    slot = Some(playback);
                                }
                                Err(e) => {
                                    log::error!("Playback error for {:?}: {}", path, e);
                                    let _ = status_tx.send(PlayerStatus::failed(e.to_string()));
                                }
                            },
                        }
                    }
                    Ok(PlayerCommand::Stop) => {
                        if slot.take().is_some() {
                            let _ = status_tx.send(PlayerStatus::idle());
                        }
                    }
                    Ok(PlayerCommand::Shutdown) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        if let Some(playback) = &slot {
                            let (keep, status) = poll_status(playback.finished(), playback.status());
                            if !keep {
                                slot = None;
                            }
                            let _ = status_tx.send(status);
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        Player { cmd_tx, status_rx }
    }

    /// Toggle playback of `uri`: stop it if it is the one playing, otherwise
    /// replace whatever is loaded and start it.
    pub fn toggle(&self, uri: &Path) {
        let _ = self.cmd_tx.send(PlayerCommand::Toggle(uri.to_path_buf()));
    }

    /// Unload the slot regardless of what is playing. Idempotent.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(PlayerCommand::Stop);
    }

    /// Subscribe to status snapshots. Detaching is just dropping the
    /// receiver.
    pub fn subscribe(&self) -> watch::Receiver<PlayerStatus> {
        self.status_rx.clone()
    }

    /// Current snapshot.
    pub fn status(&self) -> PlayerStatus {
        self.status_rx.borrow().clone()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(PlayerCommand::Shutdown);
    }
}

/// One loaded source. Dropping it releases the sink and the output stream.
struct Playback {
    // Field order matters: the sink must drop before the stream it plays on.
    sink: Sink,
    _stream_handle: OutputStreamHandle,
    _stream: OutputStream,
    uri: PathBuf,
    started: Instant,
    duration: Option<Duration>,
}

impl Playback {
    fn load(path: &Path) -> Result<Playback, PlayerError> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| PlayerError::DeviceUnavailable(e.to_string()))?;
        let sink = Sink::try_new(&handle).map_err(|e| PlayerError::DeviceUnavailable(e.to_string()))?;

        let file = File::open(path).map_err(|e| PlayerError::OpenFailed(e.to_string()))?;
        let source =
            Decoder::new(BufReader::new(file)).map_err(|e| PlayerError::DecodeFailed(e.to_string()))?;

        let duration = source.total_duration().or_else(|| wav_duration(path));

        sink.append(source);
        sink.play();
        log::info!("Playing {:?}", path);

        Ok(Playback {
            sink,
            _stream_handle: handle,
            _stream: stream,
            uri: path.to_path_buf(),
            started: Instant::now(),
            duration,
        })
    }

    fn finished(&self) -> bool {
        self.sink.empty()
    }

    fn status(&self) -> PlayerStatus {
        let duration_millis = self.duration.map(|d| d.as_millis() as u64).unwrap_or(0);
        PlayerStatus {
            uri: Some(self.uri.clone()),
            is_playing: true,
            position_millis: clamp_position(
                self.started.elapsed().as_millis() as u64,
                duration_millis,
            ),
            duration_millis,
            error: None,
        }
    }
}

/// The wall clock keeps running past end of track; never report a position
/// beyond the known duration.
fn clamp_position(position: u64, duration: u64) -> u64 {
    if duration > 0 {
        position.min(duration)
    } else {
        position
    }
}

/// Total duration of a WAV file via its header. The decoder cannot always
/// report one; every file this app plays is WAV, so this covers the gap.
fn wav_duration(path: &Path) -> Option<Duration> {
    let reader = hound::WavReader::open(path).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return None;
    }
    let seconds = reader.duration() as f64 / spec.sample_rate as f64;
    Some(Duration::from_secs_f64(seconds))
}
