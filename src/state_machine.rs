//! State machine for the recording lifecycle
//!
//! Single-writer pattern: all transitions go through `reduce()`, which
//! returns a new state and a list of effects to execute. The effect runner
//! performs the actual capture, file moves and store commits, and feeds
//! completion events back in.

use std::path::PathBuf;
use uuid::Uuid;

/// How the clip name was resolved when the naming prompt closed.
#[derive(Debug, Clone)]
pub enum NameChoice {
    /// The user typed a name. May still be empty or colliding; the effect
    /// runner validates against the store and bounces a rejection if so.
    Submitted(String),
    /// The prompt was cancelled; a default name is synthesized.
    Default,
}

/// Authoritative state of the recording workflow.
///
/// `Starting` and `Stopping` are the in-flight halves of start()/stop();
/// while one of them is pending, the opposite user action is not accepted.
#[derive(Debug, Clone)]
pub enum State {
    Idle,
    Starting {
        session_id: Uuid,
    },
    Recording {
        session_id: Uuid,
        elapsed_secs: u64,
    },
    Stopping {
        session_id: Uuid,
        elapsed_secs: u64,
    },
    /// Capture finalized and moved to permanent storage; waiting for a name.
    Finalizing {
        session_id: Uuid,
        uri: PathBuf,
        duration_secs: u64,
        /// Re-prompt message after a rejected name, if any.
        prompt: Option<String>,
    },
}

impl Default for State {
    fn default() -> Self {
        State::Idle
    }
}

impl State {
    /// Session holding capture resources, if any. Used at loop teardown to
    /// release the in-flight recording.
    pub fn active_session(&self) -> Option<Uuid> {
        match self {
            State::Idle => None,
            State::Starting { session_id }
            | State::Recording { session_id, .. }
            | State::Stopping { session_id, .. }
            | State::Finalizing { session_id, .. } => Some(*session_id),
        }
    }

    /// True while the capture stream may still be open.
    pub fn holds_capture(&self) -> bool {
        matches!(
            self,
            State::Starting { .. } | State::Recording { .. } | State::Stopping { .. }
        )
    }
}

/// Events that trigger state transitions. User commands carry no id; effect
/// completions carry the session id so stale ones can be dropped.
#[derive(Debug, Clone)]
pub enum Event {
    /// User asked to start recording.
    StartRecording,
    /// User asked to stop the current recording.
    StopRecording,
    /// Application exit requested; handled at the loop edge.
    Exit,

    // Capture events
    CaptureStarted { id: Uuid },
    CaptureStartFailed { id: Uuid, err: String },
    /// Capture finalized and moved to its permanent location.
    CaptureStopped { id: Uuid, uri: PathBuf },
    CaptureStopFailed { id: Uuid, err: String },
    /// One-second tick while recording.
    Tick { id: Uuid },

    // Naming events
    NameEntered { id: Uuid, name: String },
    NameCancelled { id: Uuid },
    NameRejected { id: Uuid, reason: String },
    ClipStored { id: Uuid, name: String },
    CommitFailed { id: Uuid, err: String },
}

/// Effects to be executed after a transition.
#[derive(Debug, Clone)]
pub enum Effect {
    StartCapture { id: Uuid },
    /// Finalize the capture and move it to permanent storage.
    StopCapture { id: Uuid },
    /// Start sending Tick events every second while the capture is active.
    StartTick { id: Uuid },
    /// Validate the name choice and append the clip to the store.
    CommitClip {
        id: Uuid,
        uri: PathBuf,
        duration_secs: u64,
        choice: NameChoice,
    },
    /// Abort path: stop the capture and delete the partial file.
    ReleaseCapture { id: Uuid },
    /// One-shot user-visible notice.
    Notify { message: String },
    /// Publish the UI snapshot.
    EmitUi,
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Rules: never mutate state in place, drop events with stale session ids,
/// emit EmitUi after every observable change.
pub fn reduce(state: &State, event: Event) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    let current_id = state.active_session();
    let is_stale = |eid: Uuid| Some(eid) != current_id;

    match (state, event) {
        // -----------------
        // Idle
        // -----------------
        (Idle, StartRecording) => {
            let id = Uuid::new_v4();
            (Starting { session_id: id }, vec![StartCapture { id }, EmitUi])
        }
        // stop() while Idle is a no-op, not an error
        (Idle, StopRecording) => (Idle, vec![]),

        // -----------------
        // Starting
        // -----------------
        (Starting { session_id }, CaptureStarted { id }) if *session_id == id => (
            Recording {
                session_id: id,
                elapsed_secs: 0,
            },
            vec![StartTick { id }, EmitUi],
        ),
        (Starting { session_id }, CaptureStartFailed { id, err }) if *session_id == id => (
            Idle,
            vec![
                Notify {
                    message: format!("Could not start recording: {}", err),
                },
                EmitUi,
            ],
        ),
        // start() must settle before stop() is accepted
        (Starting { .. }, StopRecording) => (state.clone(), vec![]),

        // -----------------
        // Recording
        // -----------------
        // start() while already recording is rejected
        (Recording { .. }, StartRecording) => (state.clone(), vec![]),
        (
            Recording {
                session_id,
                elapsed_secs,
            },
            Tick { id },
        ) if *session_id == id => (
            Recording {
                session_id: id,
                elapsed_secs: elapsed_secs + 1,
            },
            vec![EmitUi],
        ),
        (
            Recording {
                session_id,
                elapsed_secs,
            },
            StopRecording,
        ) => (
            Stopping {
                session_id: *session_id,
                elapsed_secs: *elapsed_secs,
            },
            vec![StopCapture { id: *session_id }, EmitUi],
        ),

        // -----------------
        // Stopping
        // -----------------
        (
            Stopping {
                session_id,
                elapsed_secs,
            },
            CaptureStopped { id, uri },
        ) if *session_id == id => (
            Finalizing {
                session_id: id,
                uri,
                duration_secs: *elapsed_secs,
                prompt: None,
            },
            vec![EmitUi],
        ),
        (Stopping { session_id, .. }, CaptureStopFailed { id, err }) if *session_id == id => (
            Idle,
            vec![
                Notify {
                    message: format!("Could not stop recording: {}", err),
                },
                EmitUi,
            ],
        ),

        // -----------------
        // Finalizing (naming prompt)
        // -----------------
        (
            Finalizing {
                session_id,
                uri,
                duration_secs,
                ..
            },
            NameEntered { id, name },
        ) if *session_id == id => (
            Finalizing {
                session_id: id,
                uri: uri.clone(),
                duration_secs: *duration_secs,
                prompt: None,
            },
            vec![CommitClip {
                id,
                uri: uri.clone(),
                duration_secs: *duration_secs,
                choice: NameChoice::Submitted(name),
            }],
        ),
        (
            Finalizing {
                session_id,
                uri,
                duration_secs,
                ..
            },
            NameCancelled { id },
        ) if *session_id == id => (
            state.clone(),
            vec![CommitClip {
                id,
                uri: uri.clone(),
                duration_secs: *duration_secs,
                choice: NameChoice::Default,
            }],
        ),
        (
            Finalizing {
                session_id,
                uri,
                duration_secs,
                ..
            },
            NameRejected { id, reason },
        ) if *session_id == id => (
            Finalizing {
                session_id: id,
                uri: uri.clone(),
                duration_secs: *duration_secs,
                prompt: Some(reason),
            },
            vec![EmitUi],
        ),
        (Finalizing { session_id, .. }, ClipStored { id, name }) if *session_id == id => (
            Idle,
            vec![
                Notify {
                    message: format!("Saved clip \"{}\"", name),
                },
                EmitUi,
            ],
        ),
        (Finalizing { session_id, .. }, CommitFailed { id, err }) if *session_id == id => (
            Idle,
            vec![
                Notify {
                    message: format!("Could not save clip: {}", err),
                },
                EmitUi,
            ],
        ),

        // -----------------
        // Stale completions (drop silently)
        // -----------------
        (_, CaptureStarted { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, CaptureStartFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, CaptureStopped { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, CaptureStopFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, Tick { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, NameRejected { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, ClipStored { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, CommitFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(id: Uuid) -> State {
        State::Recording {
            session_id: id,
            elapsed_secs: 0,
        }
    }

    #[test]
    fn idle_start_transitions_to_starting() {
        let (next, effects) = reduce(&State::Idle, Event::StartRecording);
        assert!(matches!(next, State::Starting { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StartCapture { .. })));
        assert!(effects.iter().any(|e| matches!(e, Effect::EmitUi)));
    }

    #[test]
    fn stop_while_idle_is_a_noop() {
        let (next, effects) = reduce(&State::Idle, Event::StopRecording);
        assert!(matches!(next, State::Idle));
        assert!(effects.is_empty());
    }

    #[test]
    fn start_while_recording_is_rejected() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&started(id), Event::StartRecording);
        assert!(matches!(next, State::Recording { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn capture_started_begins_ticking() {
        let id = Uuid::new_v4();
        let state = State::Starting { session_id: id };
        let (next, effects) = reduce(&state, Event::CaptureStarted { id });
        assert!(matches!(next, State::Recording { elapsed_secs: 0, .. }));
        assert!(effects.iter().any(|e| matches!(e, Effect::StartTick { .. })));
    }

    #[test]
    fn capture_start_failure_notifies_and_returns_to_idle() {
        let id = Uuid::new_v4();
        let state = State::Starting { session_id: id };
        let (next, effects) = reduce(
            &state,
            Event::CaptureStartFailed {
                id,
                err: "mic busy".into(),
            },
        );
        assert!(matches!(next, State::Idle));
        assert!(effects.iter().any(|e| matches!(e, Effect::Notify { .. })));
    }

    #[test]
    fn ticks_increment_elapsed_seconds() {
        let id = Uuid::new_v4();
        let mut state = started(id);
        for _ in 0..5 {
            let (next, _) = reduce(&state, Event::Tick { id });
            state = next;
        }
        assert!(matches!(state, State::Recording { elapsed_secs: 5, .. }));
    }

    #[test]
    fn stale_tick_is_dropped() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&started(id), Event::Tick { id: Uuid::new_v4() });
        assert!(matches!(next, State::Recording { elapsed_secs: 0, .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn stop_carries_elapsed_into_finalizing() {
        let id = Uuid::new_v4();
        let state = State::Recording {
            session_id: id,
            elapsed_secs: 5,
        };
        let (next, effects) = reduce(&state, Event::StopRecording);
        assert!(matches!(next, State::Stopping { elapsed_secs: 5, .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::StopCapture { .. })));

        let (next, _) = reduce(
            &next,
            Event::CaptureStopped {
                id,
                uri: PathBuf::from("/data/recording_1.wav"),
            },
        );
        match next {
            State::Finalizing {
                duration_secs,
                prompt,
                ..
            } => {
                assert_eq!(duration_secs, 5);
                assert!(prompt.is_none());
            }
            other => panic!("expected Finalizing, got {:?}", other),
        }
    }

    #[test]
    fn stop_failure_returns_to_idle_with_notice() {
        let id = Uuid::new_v4();
        let state = State::Stopping {
            session_id: id,
            elapsed_secs: 2,
        };
        let (next, effects) = reduce(
            &state,
            Event::CaptureStopFailed {
                id,
                err: "disk full".into(),
            },
        );
        assert!(matches!(next, State::Idle));
        assert!(effects.iter().any(|e| matches!(e, Effect::Notify { .. })));
    }

    #[test]
    fn submitted_name_is_forwarded_for_commit() {
        let id = Uuid::new_v4();
        let state = State::Finalizing {
            session_id: id,
            uri: PathBuf::from("/data/recording_1.wav"),
            duration_secs: 5,
            prompt: None,
        };
        let (next, effects) = reduce(
            &state,
            Event::NameEntered {
                id,
                name: "Demo".into(),
            },
        );
        assert!(matches!(next, State::Finalizing { .. }));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::CommitClip {
                choice: NameChoice::Submitted(_),
                ..
            }
        )));
    }

    #[test]
    fn cancelled_name_commits_with_default_choice() {
        let id = Uuid::new_v4();
        let state = State::Finalizing {
            session_id: id,
            uri: PathBuf::from("/data/recording_1.wav"),
            duration_secs: 5,
            prompt: None,
        };
        let (_, effects) = reduce(&state, Event::NameCancelled { id });
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::CommitClip {
                choice: NameChoice::Default,
                ..
            }
        )));
    }

    #[test]
    fn rejected_name_rearms_the_prompt_with_a_message() {
        let id = Uuid::new_v4();
        let state = State::Finalizing {
            session_id: id,
            uri: PathBuf::from("/data/recording_1.wav"),
            duration_secs: 5,
            prompt: None,
        };
        let (next, _) = reduce(
            &state,
            Event::NameRejected {
                id,
                reason: "name already used".into(),
            },
        );
        match next {
            State::Finalizing { prompt, .. } => {
                assert_eq!(prompt.as_deref(), Some("name already used"))
            }
            other => panic!("expected Finalizing, got {:?}", other),
        }
    }

    #[test]
    fn stored_clip_returns_to_idle() {
        let id = Uuid::new_v4();
        let state = State::Finalizing {
            session_id: id,
            uri: PathBuf::from("/data/recording_1.wav"),
            duration_secs: 5,
            prompt: None,
        };
        let (next, effects) = reduce(
            &state,
            Event::ClipStored {
                id,
                name: "Enregistrement".into(),
            },
        );
        assert!(matches!(next, State::Idle));
        assert!(effects.iter().any(|e| matches!(e, Effect::Notify { .. })));
    }

    #[test]
    fn stale_capture_started_is_ignored() {
        let id = Uuid::new_v4();
        let state = State::Starting { session_id: id };
        let (next, effects) = reduce(&state, Event::CaptureStarted { id: Uuid::new_v4() });
        assert!(matches!(next, State::Starting { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn active_session_tracks_capture_holding_states() {
        assert!(State::Idle.active_session().is_none());
        let id = Uuid::new_v4();
        assert_eq!(started(id).active_session(), Some(id));
        assert!(started(id).holds_capture());
        let finalizing = State::Finalizing {
            session_id: id,
            uri: PathBuf::from("/x.wav"),
            duration_secs: 1,
            prompt: None,
        };
        assert!(!finalizing.holds_capture());
    }
}
