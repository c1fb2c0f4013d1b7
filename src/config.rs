use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Policy for which capture legs feed recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioSourceMode {
    /// System output (loopback) only.
    Loopback,
    /// Default microphone only.
    #[default]
    DefaultMic,
    /// Legs derived from the individual recognition flags.
    Custom,
}

/// Policy for which capture legs feed the local recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    #[default]
    Off,
    Mic,
    Loopback,
    /// Both legs mixed into one recording.
    Mixed,
}

/// Adaptive gain presets. `Off` disables gain processing entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GainPreset {
    #[default]
    Off,
    Low,
    Medium,
    High,
}

/// Which subtitle/transcript outputs the session writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportFlags {
    pub srt: bool,
    pub vtt: bool,
    pub transcript: bool,
}

impl Default for ExportFlags {
    fn default() -> Self {
        Self {
            srt: true,
            vtt: false,
            transcript: true,
        }
    }
}

/// Credentials for the streaming translation backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendCredentials {
    pub key: String,
    pub region: String,
}

/// Configuration snapshot consumed by the engine.
///
/// The session treats this as an immutable snapshot: `update_config` swaps
/// the whole struct rather than mutating fields in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Unique session identifier (used for output filenames)
    pub session_id: String,

    /// Source language code, or "auto" for language identification
    pub source_language: String,

    /// Target translation language code
    pub target_language: String,

    /// Backend credentials (key + region)
    pub credentials: BackendCredentials,

    /// Initial/end silence timeout forwarded to the backend, in seconds
    pub silence_timeout_secs: u64,

    /// Which legs feed recognition
    pub audio_source_mode: AudioSourceMode,

    /// Recognition flags used when `audio_source_mode` is `Custom`
    pub recognize_mic: bool,
    pub recognize_loopback: bool,

    /// Selected capture device ids (None = system default)
    pub input_device_id: Option<String>,
    pub output_device_id: Option<String>,

    /// Which legs feed the local recording
    pub recording_mode: RecordingMode,

    /// Subtitle/transcript export flags
    pub export: ExportFlags,

    /// Watchdog threshold in seconds; 0 disables the no-response watchdog
    pub no_response_restart_secs: u64,

    /// Adaptive gain preset
    pub gain_preset: GainPreset,

    /// Fixed duration of each delivered audio chunk
    pub chunk_duration_ms: u64,

    /// Crossfade duration for in-place routing changes (clamped to 10-50 ms)
    pub fade_ms: u64,

    /// Strip filler words (modal particles) from recognized text
    pub filter_modal_particles: bool,

    /// Particle list used by the filter; empty = built-in defaults
    pub modal_particles: Vec<String>,

    /// Directory for transcript, subtitle, and recording files
    pub output_dir: PathBuf,

    /// Capture format
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_id: format!("session-{}", uuid::Uuid::new_v4()),
            source_language: "auto".to_string(),
            target_language: "en".to_string(),
            credentials: BackendCredentials::default(),
            silence_timeout_secs: 5,
            audio_source_mode: AudioSourceMode::DefaultMic,
            recognize_mic: true,
            recognize_loopback: false,
            input_device_id: None,
            output_device_id: None,
            recording_mode: RecordingMode::Off,
            export: ExportFlags::default(),
            no_response_restart_secs: 0,
            gain_preset: GainPreset::Off,
            chunk_duration_ms: 200,
            fade_ms: 30,
            filter_modal_particles: false,
            modal_particles: Vec::new(),
            output_dir: PathBuf::from("."),
            sample_rate: 16000,
            channels: 1,
        }
    }
}

impl EngineConfig {
    /// Load a configuration snapshot from a config file (TOML/YAML/JSON).
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()
            .with_context(|| format!("Failed to read config file: {}", path))?;

        settings
            .try_deserialize()
            .context("Failed to parse engine configuration")
    }

    /// Check that the snapshot is complete enough to start a session.
    ///
    /// The session gates its Idle -> Starting transition on this; an invalid
    /// snapshot is reported via a status event and never starts recognition.
    pub fn validate(&self) -> Result<()> {
        if self.credentials.key.trim().is_empty() {
            anyhow::bail!("missing backend credentials key");
        }
        if self.credentials.region.trim().is_empty() {
            anyhow::bail!("missing backend region");
        }
        if self.source_language.trim().is_empty() {
            anyhow::bail!("missing source language (use \"auto\" for detection)");
        }
        if self.target_language.trim().is_empty() {
            anyhow::bail!("missing target language");
        }
        if self.chunk_duration_ms == 0 {
            anyhow::bail!("chunk duration must be positive");
        }
        if self.sample_rate == 0 || self.channels == 0 {
            anyhow::bail!("invalid capture format");
        }
        Ok(())
    }
}
