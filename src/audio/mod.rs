pub mod capture;
pub mod gain;
pub mod mix;
pub mod source;

pub use capture::{
    AudioRoutingState, CaptureBackend, CaptureConfig, CaptureFactory, CaptureLeg, PcmChunk,
};
pub use gain::{AutoGainProcessor, GainParams, LevelMeter, ACTIVITY_RMS_FLOOR};
pub use source::{AudioSource, ChunkSink, Destination, RoutingApplied, RoutingChange};
