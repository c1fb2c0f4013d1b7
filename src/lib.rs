pub mod audio;
pub mod backend;
pub mod config;
pub mod recording;
pub mod routing;
pub mod session;
pub mod subtitle;

pub use audio::{
    AudioRoutingState, AudioSource, AutoGainProcessor, CaptureBackend, CaptureConfig,
    CaptureFactory, CaptureLeg, ChunkSink, Destination, PcmChunk, RoutingApplied, RoutingChange,
};
pub use backend::{
    AudioStreamReceiver, PushStream, RecognitionEvent, RecognitionResult, SpeechTranslator,
    TranslatorFactory,
};
pub use config::{AudioSourceMode, EngineConfig, ExportFlags, GainPreset, RecordingMode};
pub use recording::{RecordingSink, Transcoder};
pub use routing::RoutingCoordinator;
pub use session::{
    EngineContext, EngineEvent, EventBus, RecognitionSession, SessionLifecycleState,
    TranslationItem,
};
pub use subtitle::{SubtitleCue, SubtitleEmitter};
