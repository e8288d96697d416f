//! RAVE remote: record clips, send them to a RAVE server, play the results
//!
//! The recording workflow runs as a single-writer state loop: commands and
//! effect completions arrive on one channel, `reduce()` decides transitions,
//! and an `EffectRunner` executes the side effects. The terminal front end
//! feeds user commands into that loop and renders its snapshots.

pub mod audio;
pub mod effects;
pub mod paths;
pub mod player;
pub mod probe;
pub mod state_machine;
pub mod store;
pub mod transform;

use std::sync::Arc;

use serde::Serialize;
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, watch};

use crate::audio::AudioRecorder;
use crate::effects::{AudioEffectRunner, EffectRunner};
use crate::player::Player;
use crate::probe::{probe, ProbeResult, DEFAULT_PROBE_TIMEOUT};
use crate::state_machine::{reduce, Effect, Event, State};
use crate::store::StateStore;
use crate::transform::{run_transform, RaveModel, TransformState, MODELS};

/// Serializable snapshot of the recording workflow, for status output.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum UiState {
    Idle,
    Starting,
    #[serde(rename_all = "camelCase")]
    Recording { elapsed_secs: u64 },
    #[serde(rename_all = "camelCase")]
    Stopping { elapsed_secs: u64 },
    #[serde(rename_all = "camelCase")]
    Naming {
        duration_secs: u64,
        prompt: Option<String>,
    },
}

pub fn state_to_ui(state: &State) -> UiState {
    match state {
        State::Idle => UiState::Idle,
        State::Starting { .. } => UiState::Starting,
        State::Recording { elapsed_secs, .. } => UiState::Recording {
            elapsed_secs: *elapsed_secs,
        },
        State::Stopping { elapsed_secs, .. } => UiState::Stopping {
            elapsed_secs: *elapsed_secs,
        },
        State::Finalizing {
            duration_secs,
            prompt,
            ..
        } => UiState::Naming {
            duration_secs: *duration_secs,
            prompt: prompt.clone(),
        },
    }
}

/// Whole-second duration as m:ss for list and status output.
pub fn format_duration(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// How long the exit path waits for an in-flight capture start to settle.
const SETTLE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// The single-writer loop. Owns the authoritative `State`; everything else
/// sees it through the watch channel. Runs until an `Exit` event arrives,
/// releasing any in-flight capture on the way out.
pub async fn run_state_loop<R: EffectRunner>(
    mut rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    runner: Arc<R>,
    ui: watch::Sender<State>,
    notices: mpsc::Sender<String>,
) {
    let mut state = State::default();

    while let Some(event) = rx.recv().await {
        if matches!(event, Event::Exit) {
            if let Some(id) = state.active_session() {
                if state.holds_capture() {
                    // A start still in flight has not handed its capture
                    // handle over yet; wait for it to settle so the release
                    // actually finds something to discard.
                    if matches!(state, State::Starting { .. }) {
                        let settle = async {
                            while let Some(ev) = rx.recv().await {
                                match ev {
                                    Event::CaptureStarted { id: eid }
                                    | Event::CaptureStartFailed { id: eid, .. }
                                        if eid == id =>
                                    {
                                        break
                                    }
                                    _ => {}
                                }
                            }
                        };
                        let _ = tokio::time::timeout(SETTLE_TIMEOUT, settle).await;
                    }
                    runner.run(Effect::ReleaseCapture { id }, tx.clone());
                }
            }
            break;
        }

        log::debug!("State loop: {:?} + {:?}", state, event);
        let (next, effects) = reduce(&state, event);
        state = next;

        for effect in effects {
            match effect {
                Effect::EmitUi => {
                    let _ = ui.send(state.clone());
                }
                Effect::Notify { message } => {
                    let _ = notices.send(message).await;
                }
                other => runner.run(other, tx.clone()),
            }
        }
    }
}

const HELP: &str = "\
Commands:
  connect <host> <port>   probe the server and pin it on success
  record                  start recording from the microphone
  stop                    stop recording (then enter a name, or an empty line)
  list                    list saved clips
  play <n>                toggle playback of clip n
  delete <n>              delete clip n and its file
  models                  list the transformation models
  model <name>            choose the transformation model
  rave <n>                transform clip n on the server
  result                  toggle playback of the last transform result
  status                  show workflow, server and transform status
  help                    show this help
  quit                    exit";

/// Entry point of the terminal client.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    paths::ensure_dir(&paths::data_dir())?;
    paths::sweep_capture_tmp(&paths::capture_tmp_dir());
    let store = Arc::new(tokio::sync::Mutex::new(StateStore::load(
        &paths::state_file(),
    )));

    let recorder = AudioRecorder::new()?;
    let runner = Arc::new(AudioEffectRunner::new(recorder, store.clone()));

    let (events_tx, events_rx) = mpsc::channel::<Event>(64);
    let (ui_tx, mut ui_rx) = watch::channel(State::default());
    let (notices_tx, mut notices_rx) = mpsc::channel::<String>(16);

    let loop_handle = tokio::spawn(run_state_loop(
        events_rx,
        events_tx.clone(),
        runner,
        ui_tx,
        notices_tx,
    ));

    let player = Player::spawn();
    let (transform_tx, transform_rx) = watch::channel(TransformState::Idle);
    let mut selected_model: Option<RaveModel> = None;

    // Progress lines for the transform workflow, printed as they happen.
    tokio::spawn({
        let mut rx = transform_rx.clone();
        async move {
            while rx.changed().await.is_ok() {
                let line = match &*rx.borrow() {
                    TransformState::Idle => continue,
                    TransformState::Uploading => "Uploading clip...".to_string(),
                    TransformState::ServerProcessing => "Server is processing...".to_string(),
                    TransformState::Downloading => "Downloading result...".to_string(),
                    TransformState::Ready { result } => {
                        format!("Transform ready: {}", result.display())
                    }
                    TransformState::Error { message } => format!("Transform failed: {}", message),
                };
                println!("{}", line);
            }
        }
    });

    println!("rave-remote ready. Type `help` for commands.");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let workflow = ui_rx.borrow().clone();

                // While a clip waits for its name, the next line IS the name.
                if let State::Finalizing { session_id, .. } = workflow {
                    let name = line.trim().to_string();
                    let event = if name.is_empty() {
                        Event::NameCancelled { id: session_id }
                    } else {
                        Event::NameEntered { id: session_id, name }
                    };
                    let _ = events_tx.send(event).await;
                    continue;
                }

                if !handle_command(
                    &line,
                    &events_tx,
                    &store,
                    &player,
                    &transform_tx,
                    &transform_rx,
                    &mut selected_model,
                    &workflow,
                )
                .await
                {
                    break;
                }
            }
            Some(notice) = notices_rx.recv() => {
                println!("{}", notice);
            }
            changed = ui_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                announce(&ui_rx.borrow());
            }
        }
    }

    let _ = events_tx.send(Event::Exit).await;
    let _ = loop_handle.await;
    Ok(())
}

/// One-line announcements for workflow transitions worth narrating.
fn announce(state: &State) {
    match state {
        State::Recording { elapsed_secs: 0, .. } => println!("Recording... type `stop` to finish."),
        State::Finalizing {
            duration_secs,
            prompt: None,
            ..
        } => println!(
            "Recorded {}. Enter a name (empty line keeps the default):",
            format_duration(*duration_secs)
        ),
        State::Finalizing {
            prompt: Some(reason),
            ..
        } => println!("{}. Enter another name:", reason),
        _ => {}
    }
}

/// Dispatch one command line. Returns false when the loop should exit.
#[allow(clippy::too_many_arguments)]
async fn handle_command(
    line: &str,
    events_tx: &mpsc::Sender<Event>,
    store: &Arc<tokio::sync::Mutex<StateStore>>,
    player: &Player,
    transform_tx: &watch::Sender<TransformState>,
    transform_rx: &watch::Receiver<TransformState>,
    selected_model: &mut Option<RaveModel>,
    workflow: &State,
) -> bool {
    let mut parts = line.split_whitespace();
    let command = match parts.next() {
        Some(c) => c,
        None => return true,
    };

    match command {
        "help" => println!("{}", HELP),

        "quit" | "exit" => return false,

        "connect" => {
            let (Some(host), Some(port)) = (parts.next(), parts.next()) else {
                println!("Usage: connect <host> <port>");
                return true;
            };
            let result = probe(host, port, DEFAULT_PROBE_TIMEOUT).await;
            println!("{}", result);
            if result == ProbeResult::Success {
                if let Err(e) = store.lock().await.set_endpoint(host, port) {
                    println!("Could not save server address: {}", e);
                }
            }
        }

        "record" => {
            // recording and playback never overlap
            player.stop();
            let _ = events_tx.send(Event::StartRecording).await;
        }

        "stop" => {
            let _ = events_tx.send(Event::StopRecording).await;
        }

        "list" => {
            let clips = store.lock().await.clips();
            if clips.is_empty() {
                println!("No clips yet. `record` to make one.");
            } else {
                println!("{} clip(s):", clips.len());
            }
            for (i, clip) in clips.iter().enumerate() {
                println!(
                    "{:>3}  {}  {}  {}",
                    i + 1,
                    format_duration(clip.duration),
                    clip.name,
                    clip.uri.display()
                );
            }
        }

        "play" => {
            match clip_argument(parts.next(), store).await {
                Some(clip) => player.toggle(&clip.uri),
                None => println!("Usage: play <n> (see `list`)"),
            }
        }

        "delete" => {
            match clip_argument(parts.next(), store).await {
                Some(clip) => {
                    player.stop();
                    match store.lock().await.remove_clip(&clip.id) {
                        Ok(Some(removed)) => println!("Deleted \"{}\"", removed.name),
                        Ok(None) => println!("Clip already gone"),
                        Err(e) => println!("Could not delete clip: {}", e),
                    }
                }
                None => println!("Usage: delete <n> (see `list`)"),
            }
        }

        "models" => {
            for model in MODELS {
                let marker = if Some(model) == *selected_model { "*" } else { " " };
                println!("{} {}", marker, model);
            }
        }

        "model" => match parts.next().map(str::parse::<RaveModel>) {
            Some(Ok(model)) => {
                *selected_model = Some(model);
                // a finished job no longer matches the selection
                if !transform_in_flight(&transform_rx.borrow()) {
                    let _ = transform_tx.send(TransformState::Idle);
                }
                println!("Model set to {}", model);
            }
            _ => println!("Usage: model <{}>", model_list()),
        },

        "rave" => {
            let endpoint = store.lock().await.endpoint();
            let Some(endpoint) = endpoint else {
                println!("No server pinned. `connect <host> <port>` first.");
                return true;
            };
            let Some(model) = *selected_model else {
                println!("No model chosen. `model <{}>` first.", model_list());
                return true;
            };
            if transform_in_flight(&transform_rx.borrow()) {
                println!("A transform is already running.");
                return true;
            }
            let Some(clip) = clip_argument(parts.next(), store).await else {
                println!("Usage: rave <n> (see `list`)");
                return true;
            };

            let progress = transform_tx.clone();
            tokio::spawn(async move {
                let _ = run_transform(
                    &endpoint,
                    &clip,
                    model,
                    &paths::transformed_dir(),
                    &progress,
                )
                .await;
            });
        }

        "result" => match &*transform_rx.borrow() {
            TransformState::Ready { result } => player.toggle(result),
            TransformState::Idle => println!("No transform has run yet."),
            TransformState::Error { message } => println!("Last transform failed: {}", message),
            _ => println!("Transform still in progress."),
        },

        "status" => {
            let ui = serde_json::to_string(&state_to_ui(workflow)).unwrap_or_default();
            println!("workflow:  {}", ui);
            match store.lock().await.endpoint() {
                Some(ep) => println!("server:    {}", ep.base_url()),
                None => println!("server:    (none)"),
            }
            match selected_model {
                Some(m) => println!("model:     {}", m),
                None => println!("model:     (none)"),
            }
            println!("transform: {:?}", *transform_rx.borrow());
            let playback = player.status();
            match &playback.uri {
                Some(uri) => {
                    let percent = playback
                        .progress()
                        .map(|f| format!(", {:.0}%", f * 100.0))
                        .unwrap_or_default();
                    println!(
                        "playback:  {} ({} / {}{})",
                        uri.display(),
                        format_duration(playback.position_millis / 1000),
                        format_duration(playback.duration_millis / 1000),
                        percent
                    );
                }
                None => println!("playback:  (stopped)"),
            }
        }

        other => println!("Unknown command `{}`. Type `help`.", other),
    }

    true
}

fn model_list() -> String {
    MODELS
        .iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join("|")
}

fn transform_in_flight(state: &TransformState) -> bool {
    matches!(
        state,
        TransformState::Uploading | TransformState::ServerProcessing | TransformState::Downloading
    )
}

/// Resolve a 1-based list index argument to a clip snapshot.
async fn clip_argument(
    arg: Option<&str>,
    store: &Arc<tokio::sync::Mutex<StateStore>>,
) -> Option<store::Clip> {
    let index: usize = arg?.parse().ok()?;
    let clips = store.lock().await.clips();
    if index == 0 || index > clips.len() {
        return None;
    }
    Some(clips[index - 1].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_format_as_minutes_and_seconds() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(5), "0:05");
        assert_eq!(format_duration(65), "1:05");
        assert_eq!(format_duration(600), "10:00");
    }

    #[test]
    fn ui_state_serializes_with_a_status_tag() {
        let ui = state_to_ui(&State::Recording {
            session_id: uuid::Uuid::new_v4(),
            elapsed_secs: 7,
        });
        let json = serde_json::to_value(&ui).unwrap();
        assert_eq!(json["status"], "recording");
        assert_eq!(json["elapsedSecs"], 7);
    }

    #[test]
    fn naming_snapshot_carries_the_reprompt_reason() {
        let ui = state_to_ui(&State::Finalizing {
            session_id: uuid::Uuid::new_v4(),
            uri: std::path::PathBuf::from("/x.wav"),
            duration_secs: 3,
            prompt: Some("taken".into()),
        });
        let json = serde_json::to_value(&ui).unwrap();
        assert_eq!(json["status"], "naming");
        assert_eq!(json["prompt"], "taken");
    }

    #[test]
    fn transform_in_flight_covers_the_active_states() {
        assert!(transform_in_flight(&TransformState::Uploading));
        assert!(transform_in_flight(&TransformState::Downloading));
        assert!(!transform_in_flight(&TransformState::Idle));
        assert!(!transform_in_flight(&TransformState::Ready {
            result: std::path::PathBuf::from("/r.wav")
        }));
    }
}
