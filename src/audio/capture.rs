use anyhow::Result;
use tokio::sync::mpsc;

/// Capture leg type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureLeg {
    /// Microphone input
    Microphone,
    /// Loopback capture of a render (output) device
    Loopback,
}

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct PcmChunk {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
    /// Which leg produced this chunk
    pub leg: CaptureLeg,
}

/// Format requested from a capture backend
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Target sample rate (backend resamples if needed)
    pub sample_rate: u32,
    /// Target channel count (1 = mono, 2 = stereo)
    pub channels: u16,
    /// Backend buffer size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            buffer_duration_ms: 100,
        }
    }
}

/// Routing state for one delivery destination (recognition or recording).
///
/// Two independent instances exist per session; they may diverge. Mutated
/// only by the routing coordinator under its apply lock.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioRoutingState {
    pub enable_loopback: bool,
    pub enable_mic: bool,
    /// Microphone device id (None = system default)
    pub input_device_id: Option<String>,
    /// Render device id for loopback (None = system default)
    pub output_device_id: Option<String>,
}

impl AudioRoutingState {
    /// Microphone-only routing on the default device.
    pub fn default_mic() -> Self {
        Self {
            enable_mic: true,
            ..Self::default()
        }
    }

    /// No legs enabled; the destination receives nothing.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn is_silent(&self) -> bool {
        !self.enable_mic && !self.enable_loopback
    }

    /// The legs this routing enables.
    pub fn legs(&self) -> Vec<CaptureLeg> {
        let mut legs = Vec::new();
        if self.enable_mic {
            legs.push(CaptureLeg::Microphone);
        }
        if self.enable_loopback {
            legs.push(CaptureLeg::Loopback);
        }
        legs
    }

    /// Device id selected for a leg (None = system default).
    pub fn device_for(&self, leg: CaptureLeg) -> Option<&str> {
        match leg {
            CaptureLeg::Microphone => self.input_device_id.as_deref(),
            CaptureLeg::Loopback => self.output_device_id.as_deref(),
        }
    }
}

/// One open capture leg.
///
/// Implementations wrap the platform audio subsystem (WASAPI, CoreAudio,
/// cpal, ...); the engine only consumes the trait.
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Start capturing; returns a receiver of fixed-size PCM16 chunks.
    async fn start(&mut self) -> Result<mpsc::Receiver<PcmChunk>>;

    /// Stop capturing. The backend flushes any buffered audio into the
    /// receiver before closing it.
    async fn stop(&mut self) -> Result<()>;

    /// Whether the backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Opens capture devices by id.
///
/// Injected into the engine so tests and hosts choose the audio subsystem.
pub trait CaptureFactory: Send + Sync {
    fn open(
        &self,
        leg: CaptureLeg,
        device_id: Option<&str>,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureBackend>>;
}
