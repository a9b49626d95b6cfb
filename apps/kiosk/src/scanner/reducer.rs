//! Scan controller reducer.
//!
//! Owns the camera lifecycle and turns the raw decode stream into candidates:
//!
//! ```text
//! FrameDecoded ──► debounce window (300 ms) ──► cooldown check ──► CandidateDetected
//!                                                     │
//!                                                     └─ same text within 3000 ms: dropped
//! ```
//!
//! Every emitted text keeps its own cooldown, so reading another code in
//! between does not let a repeat through.
//!
//! Every asynchronous action carries the session epoch it was started under;
//! feedback from an older epoch is ignored. The decode loop and the timers
//! run under [`EffectId`]s (one keyed slot per cooldown) so stopping can
//! cancel them and wait for the stream to be dropped before anything else
//! opens the camera.

use super::types::{Cooldown, DebounceWindow, ScanAction, ScanEnvironment, ScanPhase, ScanState};
use futures::StreamExt;
use kiosk_core::camera::{CameraError, DeviceId, preferred_device};
use kiosk_core::effect::{Effect, EffectId};
use kiosk_core::reducer::Reducer;
use kiosk_core::{SmallVec, smallvec};
use std::sync::Arc;

/// Slot of the camera decode loop
pub const DECODE_LOOP: EffectId = EffectId::new("decode-loop");

/// Slot of the debounce timer
pub const DEBOUNCE_TIMER: EffectId = EffectId::new("debounce-timer");

/// Name of the cooldown timers; each cooldown runs under `COOLDOWN_TIMER.keyed(seq)`
pub const COOLDOWN_TIMER: EffectId = EffectId::new("cooldown-timer");

type Effects = SmallVec<[Effect<ScanAction>; 4]>;

/// Reducer for the scan controller
#[derive(Clone, Debug, Default)]
pub struct ScanReducer;

impl ScanReducer {
    /// Creates a new `ScanReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Open a new epoch and start the decode loop on `device`
    fn start_device(state: &mut ScanState, device: DeviceId, env: &ScanEnvironment) -> Effects {
        state.session += 1;
        state.camera_error = None;
        state.reset_session();
        state.phase = ScanPhase::Starting {
            device: device.clone(),
        };

        tracing::info!(device = %device, session = state.session, "Starting camera");
        smallvec![decode_loop(env, state.session, device)]
    }

    /// Enter `Stopping` and release the stream and timers
    fn begin_stop(state: &mut ScanState, next: Option<DeviceId>) -> Effects {
        let cooldown_timers: Vec<EffectId> = state
            .cooldowns
            .values()
            .map(|c| COOLDOWN_TIMER.keyed(c.seq))
            .collect();

        state.reset_session();
        state.phase = ScanPhase::Stopping { next };
        smallvec![release(state.session, cooldown_timers)]
    }

    /// Camera failure: surface the error and release whatever is open
    fn fail(state: &mut ScanState, error: CameraError) -> Effects {
        tracing::warn!(%error, session = state.session, "Camera error");
        metrics::counter!("scanner.camera_errors.total").increment(1);

        let was_streaming = state.is_scanning();
        state.camera_error = Some(error.clone());

        let mut effects: Effects = smallvec![Effect::send(ScanAction::CameraFailed { error })];
        if was_streaming {
            effects.extend(Self::begin_stop(state, None));
        } else {
            state.phase = ScanPhase::Idle;
        }
        effects
    }

    fn on_frame(state: &mut ScanState, text: String, env: &ScanEnvironment) -> Effects {
        let text = text.trim().to_string();
        if text.is_empty() {
            return SmallVec::new();
        }

        state.last_decoded = Some(text.clone());

        if let Some(window) = state.debounce.as_mut() {
            window.text = text;
            return SmallVec::new();
        }

        let seq = state.next_timer_seq();
        state.debounce = Some(DebounceWindow {
            text,
            opened_at: env.clock.now(),
            seq,
        });

        smallvec![
            Effect::delay(
                env.config.debounce,
                ScanAction::DebounceElapsed {
                    session: state.session,
                    seq,
                },
            )
            .cancellable(DEBOUNCE_TIMER)
        ]
    }

    fn on_debounce_elapsed(state: &mut ScanState, seq: u64, env: &ScanEnvironment) -> Effects {
        let Some(window) = state.debounce.take_if(|w| w.seq == seq) else {
            return SmallVec::new();
        };

        if state.cooldowns.contains_key(&window.text) {
            state.suppressed += 1;
            tracing::debug!(text = %window.text, "Repeat read suppressed by cooldown");
            metrics::counter!("scanner.reads.suppressed").increment(1);
            return SmallVec::new();
        }

        let seq = state.next_timer_seq();
        state.cooldowns.insert(
            window.text.clone(),
            Cooldown {
                started_at: env.clock.now(),
                seq,
            },
        );
        state.candidates_emitted += 1;

        tracing::info!(text = %window.text, "Candidate detected");
        metrics::counter!("scanner.candidates.total").increment(1);

        smallvec![
            Effect::send(ScanAction::CandidateDetected { text: window.text }),
            Effect::delay(
                env.config.cooldown,
                ScanAction::CooldownElapsed {
                    session: state.session,
                    seq,
                },
            )
            .cancellable(COOLDOWN_TIMER.keyed(seq)),
        ]
    }
}

impl Reducer for ScanReducer {
    type State = ScanState;
    type Action = ScanAction;
    type Environment = ScanEnvironment;

    #[allow(clippy::too_many_lines)] // One arm per action
    fn reduce(
        &self,
        state: &mut ScanState,
        action: ScanAction,
        env: &ScanEnvironment,
    ) -> SmallVec<[Effect<ScanAction>; 4]> {
        match action {
            ScanAction::Start => match state.phase {
                ScanPhase::Idle => {
                    state.session += 1;
                    state.camera_error = None;
                    state.phase = ScanPhase::Enumerating;

                    smallvec![enumerate(env, state.session)]
                },
                // Restart right after the release that is in flight
                ScanPhase::Stopping { next: None } => {
                    let next = preferred_device(&state.devices, state.user_choice.as_ref())
                        .map(|d| d.id.clone());
                    state.phase = ScanPhase::Stopping { next };
                    SmallVec::new()
                },
                _ => {
                    tracing::debug!(phase = ?state.phase, "Start ignored: scanner busy");
                    SmallVec::new()
                },
            },

            ScanAction::DevicesListed { session, result } => {
                if session != state.session || state.phase != ScanPhase::Enumerating {
                    return SmallVec::new();
                }

                match result {
                    Err(error) => Self::fail(state, error),
                    Ok(devices) if devices.is_empty() => {
                        state.devices.clear();
                        Self::fail(state, CameraError::NoDevices)
                    },
                    Ok(devices) => {
                        state.devices = devices;
                        let chosen = preferred_device(&state.devices, state.user_choice.as_ref())
                            .map(|d| d.id.clone());

                        match chosen {
                            Some(device) => Self::start_device(state, device, env),
                            None => Self::fail(state, CameraError::NoDevices),
                        }
                    },
                }
            },

            ScanAction::SelectDevice { device_id } => {
                state.user_choice = Some(device_id.clone());

                match state.phase.clone() {
                    ScanPhase::Idle if state.devices.is_empty() => {
                        state.session += 1;
                        state.camera_error = None;
                        state.phase = ScanPhase::Enumerating;
                        smallvec![enumerate(env, state.session)]
                    },
                    ScanPhase::Idle => Self::start_device(state, device_id, env),
                    // The pending enumeration picks up the choice
                    ScanPhase::Enumerating => SmallVec::new(),
                    ScanPhase::Starting { device } | ScanPhase::Running { device } => {
                        if device == device_id {
                            return SmallVec::new();
                        }
                        tracing::info!(from = %device, to = %device_id, "Switching camera");
                        Self::begin_stop(state, Some(device_id))
                    },
                    ScanPhase::Stopping { .. } => {
                        state.phase = ScanPhase::Stopping {
                            next: Some(device_id),
                        };
                        SmallVec::new()
                    },
                }
            },

            ScanAction::StreamStarted { session, device } => {
                if session != state.session {
                    return SmallVec::new();
                }
                if matches!(&state.phase, ScanPhase::Starting { device: starting } if *starting == device) {
                    tracing::info!(device = %device, "Camera running");
                    state.phase = ScanPhase::Running { device };
                }
                SmallVec::new()
            },

            ScanAction::FrameDecoded { session, text } => {
                if session != state.session || !matches!(state.phase, ScanPhase::Running { .. }) {
                    return SmallVec::new();
                }
                Self::on_frame(state, text, env)
            },

            ScanAction::StreamFailed { session, error } => {
                if session != state.session || !state.is_scanning() {
                    return SmallVec::new();
                }
                Self::fail(state, error)
            },

            ScanAction::DebounceElapsed { session, seq } => {
                if session != state.session {
                    return SmallVec::new();
                }
                Self::on_debounce_elapsed(state, seq, env)
            },

            ScanAction::CooldownElapsed { session, seq } => {
                if session != state.session {
                    return SmallVec::new();
                }
                let ended = state
                    .cooldowns
                    .iter()
                    .find(|(_, c)| c.seq == seq)
                    .map(|(text, _)| text.clone());

                if let Some(text) = ended {
                    state.cooldowns.remove(&text);
                    if state.last_decoded.as_ref() == Some(&text) {
                        state.last_decoded = None;
                    }
                }
                SmallVec::new()
            },

            ScanAction::Stop => match state.phase {
                ScanPhase::Idle => SmallVec::new(),
                ScanPhase::Enumerating => {
                    // Invalidate the pending enumeration
                    state.session += 1;
                    state.phase = ScanPhase::Idle;
                    SmallVec::new()
                },
                ScanPhase::Starting { .. } | ScanPhase::Running { .. } => {
                    tracing::info!(session = state.session, "Stopping camera");
                    Self::begin_stop(state, None)
                },
                ScanPhase::Stopping { .. } => {
                    state.phase = ScanPhase::Stopping { next: None };
                    SmallVec::new()
                },
            },

            ScanAction::StreamReleased { session } => {
                if session != state.session {
                    return SmallVec::new();
                }
                let next = match &mut state.phase {
                    ScanPhase::Stopping { next } => next.take(),
                    _ => return SmallVec::new(),
                };

                tracing::debug!(session, "Camera released");
                match next {
                    Some(device) => Self::start_device(state, device, env),
                    None => {
                        state.phase = ScanPhase::Idle;
                        SmallVec::new()
                    },
                }
            },

            ScanAction::DismissError => {
                state.camera_error = None;
                SmallVec::new()
            },

            // Output only, observed through the store broadcast
            ScanAction::CandidateDetected { .. } | ScanAction::CameraFailed { .. } => SmallVec::new(),
        }
    }
}

/// Enumerate devices under `session`
fn enumerate(env: &ScanEnvironment, session: u64) -> Effect<ScanAction> {
    let camera = Arc::clone(&env.camera);
    Effect::Future(Box::pin(async move {
        let result = camera.enumerate_devices().await;
        Some(ScanAction::DevicesListed { session, result })
    }))
}

/// Open `device` and feed every decoded frame back as `FrameDecoded`.
///
/// The stream owns the camera; cancelling the `DECODE_LOOP` slot drops it.
fn decode_loop(env: &ScanEnvironment, session: u64, device: DeviceId) -> Effect<ScanAction> {
    let camera = Arc::clone(&env.camera);
    let config = env.config.stream;

    let stream = async_stream::stream! {
        let mut frames = match camera.open_stream(&device, config).await {
            Ok(frames) => frames,
            Err(error) => {
                yield ScanAction::StreamFailed { session, error };
                return;
            },
        };

        yield ScanAction::StreamStarted { session, device: device.clone() };

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(text) => yield ScanAction::FrameDecoded { session, text },
                Err(error) => {
                    yield ScanAction::StreamFailed { session, error };
                    return;
                },
            }
        }

        yield ScanAction::StreamFailed {
            session,
            error: CameraError::StreamEnded { device },
        };
    };

    Effect::Stream(Box::pin(stream)).cancellable(DECODE_LOOP)
}

/// Cancel the decode loop and every timer, then report the release
fn release(session: u64, cooldown_timers: Vec<EffectId>) -> Effect<ScanAction> {
    let mut steps = vec![Effect::Cancel(DECODE_LOOP), Effect::Cancel(DEBOUNCE_TIMER)];
    steps.extend(cooldown_timers.into_iter().map(Effect::Cancel));
    steps.push(Effect::Future(Box::pin(async move {
        Some(ScanAction::StreamReleased { session })
    })));
    Effect::chain(steps)
}
