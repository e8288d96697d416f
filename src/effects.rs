//! Effect execution for the recording state machine
//!
//! The reducer stays pure; everything that touches the microphone, the
//! filesystem or the store happens here. Each effect runs on its own spawned
//! task and reports back by sending completion events into the loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio::{AudioRecorder, RecordingHandle};
use crate::paths;
use crate::state_machine::{Effect, Event, NameChoice};
use crate::store::{Clip, StateStore, StoreError};

/// Executes reducer effects. The loop owns one runner for the lifetime of the
/// app; tests substitute their own.
pub trait EffectRunner: Send + Sync + 'static {
    fn run(&self, effect: Effect, tx: mpsc::Sender<Event>);
}

type HandleMap = Arc<Mutex<HashMap<Uuid, RecordingHandle>>>;

/// Production runner: real microphone, real files, real store.
pub struct AudioEffectRunner {
    recorder: Arc<AudioRecorder>,
    active: HandleMap,
    store: Arc<tokio::sync::Mutex<StateStore>>,
    capture_tmp_dir: PathBuf,
    recordings_dir: PathBuf,
}

impl AudioEffectRunner {
    pub fn new(recorder: AudioRecorder, store: Arc<tokio::sync::Mutex<StateStore>>) -> Self {
        AudioEffectRunner {
            recorder: Arc::new(recorder),
            active: Arc::new(Mutex::new(HashMap::new())),
            store,
            capture_tmp_dir: paths::capture_tmp_dir(),
            recordings_dir: paths::recordings_dir(),
        }
    }

    fn take_handle(&self, id: Uuid) -> Option<RecordingHandle> {
        self.active.lock().unwrap_or_else(|p| p.into_inner()).remove(&id)
    }

    fn is_active(active: &HandleMap, id: Uuid) -> bool {
        active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(&id)
    }
}

impl EffectRunner for AudioEffectRunner {
    fn run(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::StartCapture { id } => {
                let recorder = self.recorder.clone();
                let active = self.active.clone();
                let tmp_dir = self.capture_tmp_dir.clone();
                tokio::spawn(async move {
                    let started =
                        tokio::task::spawn_blocking(move || recorder.start(id, &tmp_dir)).await;
                    let event = match started {
                        Ok(Ok(handle)) => {
                            active
                                .lock()
                                .unwrap_or_else(|p| p.into_inner())
                                .insert(id, handle);
                            Event::CaptureStarted { id }
                        }
                        Ok(Err(e)) => Event::CaptureStartFailed {
                            id,
                            err: e.to_string(),
                        },
                        Err(e) => Event::CaptureStartFailed {
                            id,
                            err: e.to_string(),
                        },
                    };
                    let _ = tx.send(event).await;
                });
            }

            Effect::StopCapture { id } => {
                let handle = self.take_handle(id);
                let recordings_dir = self.recordings_dir.clone();
                tokio::spawn(async move {
                    let event = match handle {
                        Some(handle) => {
                            let finished = tokio::task::spawn_blocking(move || {
                                let tmp_path = handle.finish()?;
                                paths::ensure_dir(&recordings_dir).map_err(|e| {
                                    crate::audio::AudioError::FinalizeFailed(e.to_string())
                                })?;
                                let dest = paths::generate_recording_path(&recordings_dir);
                                std::fs::rename(&tmp_path, &dest).map_err(|e| {
                                    crate::audio::AudioError::FinalizeFailed(e.to_string())
                                })?;
                                Ok::<PathBuf, crate::audio::AudioError>(dest)
                            })
                            .await;
                            match finished {
                                Ok(Ok(uri)) => Event::CaptureStopped { id, uri },
                                Ok(Err(e)) => Event::CaptureStopFailed {
                                    id,
                                    err: e.to_string(),
                                },
                                Err(e) => Event::CaptureStopFailed {
                                    id,
                                    err: e.to_string(),
                                },
                            }
                        }
                        None => Event::CaptureStopFailed {
                            id,
                            err: "no capture in flight".to_string(),
                        },
                    };
                    let _ = tx.send(event).await;
                });
            }

            Effect::StartTick { id } => {
                let active = self.active.clone();
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(Duration::from_secs(1));
                    interval.tick().await; // first tick fires immediately
                    loop {
                        interval.tick().await;
                        if !Self::is_active(&active, id) {
                            break;
                        }
                        if tx.send(Event::Tick { id }).await.is_err() {
                            break;
                        }
                    }
                });
            }

            Effect::CommitClip {
                id,
                uri,
                duration_secs,
                choice,
            } => {
                let store = self.store.clone();
                tokio::spawn(async move {
                    let mut store = store.lock().await;
                    let event = commit_clip(&mut store, id, uri, duration_secs, choice);
                    let _ = tx.send(event).await;
                });
            }

            Effect::ReleaseCapture { id } => {
                if let Some(handle) = self.take_handle(id) {
                    tokio::task::spawn_blocking(move || handle.discard());
                }
            }

            // Presentation effects are handled at the loop edge.
            Effect::Notify { .. } | Effect::EmitUi => {}
        }
    }
}

/// Resolve the final clip name from the prompt outcome. Submitted names are
/// trimmed and checked against the store; rejections carry the reason shown
/// on the re-prompt.
pub fn resolve_name(store: &StateStore, choice: &NameChoice) -> Result<String, String> {
    match choice {
        NameChoice::Submitted(raw) => {
            let name = raw.trim();
            if name.is_empty() {
                return Err("Name cannot be empty".to_string());
            }
            if store.is_name_taken(name) {
                return Err(format!("A clip named \"{}\" already exists", name));
            }
            Ok(name.to_string())
        }
        NameChoice::Default => Ok(store.default_clip_name()),
    }
}

/// Shared commit path: validate, append, persist, classify the outcome.
pub fn commit_clip(
    store: &mut StateStore,
    id: Uuid,
    uri: PathBuf,
    duration_secs: u64,
    choice: NameChoice,
) -> Event {
    let name = match resolve_name(store, &choice) {
        Ok(name) => name,
        Err(reason) => return Event::NameRejected { id, reason },
    };

    let clip = Clip {
        id: Uuid::new_v4().to_string(),
        name: name.clone(),
        uri,
        duration: duration_secs,
    };

    match store.append_clip(clip) {
        Ok(()) => {
            log::info!("Clip stored: \"{}\" ({}s)", name, duration_secs);
            Event::ClipStored { id, name }
        }
        // the store re-validates; a race still surfaces as a re-prompt
        Err(StoreError::DuplicateName(name)) => Event::NameRejected {
            id,
            reason: format!("A clip named \"{}\" already exists", name),
        },
        Err(e) => Event::CommitFailed {
            id,
            err: e.to_string(),
        },
    }
}
