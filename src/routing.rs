// Live routing coordination.
//
// Configuration updates can arrive in rapid bursts (every checkbox toggle
// in a settings panel). The coordinator turns such a burst into exactly one
// applied mutation: each request takes a version, schedules a delayed
// apply, and only the request still current when its delay expires touches
// the audio source. The apply itself runs under a lock so at most one
// routing mutation is in flight.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::audio::{AudioRoutingState, AudioSource, RoutingApplied, RoutingChange};
use crate::config::{AudioSourceMode, EngineConfig, RecordingMode};
use crate::session::{EngineEvent, EventBus};

/// Delay that coalesces a burst of requests into one apply.
pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(250);

/// Target recognition routing for a configuration snapshot.
pub fn recognition_routing(config: &EngineConfig) -> AudioRoutingState {
    let mut routing = match config.audio_source_mode {
        AudioSourceMode::Loopback => AudioRoutingState {
            enable_loopback: true,
            ..Default::default()
        },
        AudioSourceMode::DefaultMic => AudioRoutingState::default_mic(),
        AudioSourceMode::Custom => AudioRoutingState {
            enable_mic: config.recognize_mic,
            enable_loopback: config.recognize_loopback,
            ..Default::default()
        },
    };
    // Recognition always needs at least one leg.
    if routing.is_silent() {
        routing.enable_mic = true;
    }
    routing.input_device_id = config.input_device_id.clone();
    routing.output_device_id = config.output_device_id.clone();
    routing
}

/// Target recording routing for a configuration snapshot. May legitimately
/// differ from the recognition legs.
pub fn recording_routing(config: &EngineConfig) -> AudioRoutingState {
    let mut routing = match config.recording_mode {
        RecordingMode::Off => return AudioRoutingState::silent(),
        RecordingMode::Mic => AudioRoutingState::default_mic(),
        RecordingMode::Loopback => AudioRoutingState {
            enable_loopback: true,
            ..Default::default()
        },
        RecordingMode::Mixed => AudioRoutingState {
            enable_mic: true,
            enable_loopback: true,
            ..Default::default()
        },
    };
    routing.input_device_id = config.input_device_id.clone();
    routing.output_device_id = config.output_device_id.clone();
    routing
}

#[derive(Serialize)]
struct RoutingDiagnostics<'a> {
    applied: &'a str,
    version: u64,
    rebuilds: u64,
    crossfades: u64,
}

/// Debounces routing requests and applies the surviving one.
pub struct RoutingCoordinator {
    /// Audio source of the active session; None while no session runs.
    audio: Arc<std::sync::Mutex<Option<Arc<AudioSource>>>>,
    request_version: Arc<AtomicU64>,
    apply_lock: Arc<tokio::sync::Mutex<()>>,
    applied_count: Arc<AtomicU64>,
    events: EventBus,
    debounce: Duration,
}

impl RoutingCoordinator {
    pub fn new(events: EventBus) -> Self {
        Self::with_debounce(events, DEBOUNCE_DELAY)
    }

    pub fn with_debounce(events: EventBus, debounce: Duration) -> Self {
        Self {
            audio: Arc::new(std::sync::Mutex::new(None)),
            request_version: Arc::new(AtomicU64::new(0)),
            apply_lock: Arc::new(tokio::sync::Mutex::new(())),
            applied_count: Arc::new(AtomicU64::new(0)),
            events,
            debounce,
        }
    }

    /// Point the coordinator at the active session's audio source
    /// (None when the session stops).
    pub fn attach(&self, audio: Option<Arc<AudioSource>>) {
        if let Ok(mut slot) = self.audio.lock() {
            *slot = audio;
        }
    }

    /// Number of routing mutations actually applied.
    pub fn applied_count(&self) -> u64 {
        self.applied_count.load(Ordering::SeqCst)
    }

    /// Request a routing change derived from a configuration snapshot.
    ///
    /// Returns immediately; the apply runs after the debounce delay unless
    /// a newer request supersedes it (last request wins).
    pub fn request(&self, config: EngineConfig) {
        let version = self.request_version.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Routing request v{} scheduled", version);

        let audio_slot = Arc::clone(&self.audio);
        let current_version = Arc::clone(&self.request_version);
        let apply_lock = Arc::clone(&self.apply_lock);
        let applied_count = Arc::clone(&self.applied_count);
        let events = self.events.clone();
        let debounce = self.debounce;

        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if current_version.load(Ordering::SeqCst) != version {
                // Superseded by a newer request; silent no-op.
                return;
            }

            let _guard = apply_lock.lock().await;
            if current_version.load(Ordering::SeqCst) != version {
                return;
            }

            let audio = match audio_slot.lock() {
                Ok(slot) => slot.clone(),
                Err(_) => None,
            };
            let Some(audio) = audio else {
                debug!("Routing request v{} dropped: no active session", version);
                return;
            };

            let change = RoutingChange {
                recognition: recognition_routing(&config),
                recording: recording_routing(&config),
                fade_ms: config.fade_ms,
            };
            match audio.update_routing(change).await {
                Ok(applied) => {
                    applied_count.fetch_add(1, Ordering::SeqCst);
                    let summary = RoutingDiagnostics {
                        applied: match applied {
                            RoutingApplied::Unchanged => "unchanged",
                            RoutingApplied::Crossfade => "crossfade",
                            RoutingApplied::Rebuild => "rebuild",
                        },
                        version,
                        rebuilds: audio.rebuild_count(),
                        crossfades: audio.crossfade_count(),
                    };
                    if let Ok(json) = serde_json::to_string(&summary) {
                        events.publish(EngineEvent::Diagnostics(json));
                    }
                }
                Err(e) => {
                    warn!("Routing apply v{} failed: {}", version, e);
                    events.status(format!("routing update failed: {}", e));
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendCredentials;

    fn config_with(mode: AudioSourceMode) -> EngineConfig {
        EngineConfig {
            audio_source_mode: mode,
            credentials: BackendCredentials {
                key: "k".into(),
                region: "r".into(),
            },
            ..EngineConfig::default()
        }
    }

    #[test]
    fn loopback_mode_routes_loopback_only() {
        let routing = recognition_routing(&config_with(AudioSourceMode::Loopback));
        assert!(routing.enable_loopback);
        assert!(!routing.enable_mic);
    }

    #[test]
    fn default_mic_mode_routes_mic_only() {
        let routing = recognition_routing(&config_with(AudioSourceMode::DefaultMic));
        assert!(routing.enable_mic);
        assert!(!routing.enable_loopback);
    }

    #[test]
    fn custom_mode_follows_flags_with_mic_fallback() {
        let mut cfg = config_with(AudioSourceMode::Custom);
        cfg.recognize_mic = false;
        cfg.recognize_loopback = true;
        let routing = recognition_routing(&cfg);
        assert!(routing.enable_loopback && !routing.enable_mic);

        // Both flags off never yields a silent recognition routing.
        cfg.recognize_loopback = false;
        assert!(recognition_routing(&cfg).enable_mic);
    }

    #[test]
    fn recording_policy_is_independent() {
        let mut cfg = config_with(AudioSourceMode::Loopback);
        cfg.recording_mode = RecordingMode::Mic;
        let recognition = recognition_routing(&cfg);
        let recording = recording_routing(&cfg);
        assert!(recognition.enable_loopback && !recognition.enable_mic);
        assert!(recording.enable_mic && !recording.enable_loopback);

        cfg.recording_mode = RecordingMode::Off;
        assert!(recording_routing(&cfg).is_silent());
    }
}
