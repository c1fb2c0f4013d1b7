// Real-time speech-translation session engine.
//
// One RecognitionSession owns the audio source, the backend recognizer, the
// subtitle/transcript writers, and the watchdog. All lifecycle mutations
// (start, stop, config updates, reconnects) are routed through a single
// command queue processed by one actor task, so they are mutually exclusive
// by construction; the watchdog enqueues its reconnect like any other
// command and therefore waits instead of racing.

pub mod events;
pub mod watchdog;

pub use events::{EngineEvent, EventBus, TranslationItem};
pub use watchdog::ActivityClock;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::audio::{
    AudioRoutingState, AudioSource, AutoGainProcessor, CaptureConfig, ChunkSink, Destination,
    LevelMeter, ACTIVITY_RMS_FLOOR,
};
use crate::backend::{PushStream, RecognitionEvent, RecognitionResult, SpeechTranslator};
use crate::config::EngineConfig;
use crate::recording::{RecordingSink, Transcoder};
use crate::routing::{self, RoutingCoordinator};
use crate::subtitle::{SrtWriter, SubtitleEmitter, TranscriptWriter, VttWriter};
use watchdog::WatchdogHandle;

/// Lifecycle of the single session an engine instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLifecycleState {
    Idle,
    Starting,
    Listening,
    Reconnecting,
    Stopped,
}

/// External collaborators the session needs, passed in explicitly instead
/// of living in globals.
#[derive(Clone)]
pub struct EngineContext {
    pub capture: Arc<dyn crate::audio::CaptureFactory>,
    pub translator: Arc<dyn crate::backend::TranslatorFactory>,
    pub transcoder: Arc<dyn Transcoder>,
}

/// Commands processed by the session actor, in order.
pub enum Command {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<Result<()>>),
    UpdateConfig(Box<EngineConfig>, oneshot::Sender<Result<()>>),
    Reconnect { reason: String },
}

/// Built-in filler words stripped when no custom list is configured.
const DEFAULT_MODAL_PARTICLES: &[&str] = &[
    "嗯", "啊", "呃", "那个", "就是说", "えっと", "あのー", "um,", "uh,",
];

/// Strips configured modal particles from recognized text.
#[derive(Clone)]
pub struct ParticleFilter {
    particles: Vec<String>,
}

impl ParticleFilter {
    pub fn from_config(config: &EngineConfig) -> Option<Self> {
        if !config.filter_modal_particles {
            return None;
        }
        let particles = if config.modal_particles.is_empty() {
            DEFAULT_MODAL_PARTICLES.iter().map(|s| s.to_string()).collect()
        } else {
            config.modal_particles.clone()
        };
        Some(Self { particles })
    }

    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for particle in &self.particles {
            out = out.replace(particle.as_str(), "");
        }
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Subtitle and transcript writers for one session.
struct OutputWriters {
    emitter: SubtitleEmitter,
    transcript: Option<TranscriptWriter>,
}

/// The synchronous chunk-path work: gain, level/activity metering, backend
/// push, recording tap. Runs inside the audio delivery callback and must
/// never block for long or fail outward.
struct EnginePipeline {
    gain: StdMutex<AutoGainProcessor>,
    level: StdMutex<LevelMeter>,
    push: PushStream,
    clock: Arc<ActivityClock>,
    recording: Arc<StdMutex<Option<RecordingSink>>>,
    events: EventBus,
    recording_failed: AtomicBool,
}

impl ChunkSink for EnginePipeline {
    fn on_chunk(&self, destination: Destination, samples: &mut [i16]) {
        match destination {
            Destination::Recognition => {
                if let Ok(mut gain) = self.gain.lock() {
                    gain.process(samples);
                }
                if let Ok(mut meter) = self.level.lock() {
                    let (level, rms) = meter.update(samples);
                    self.events.publish(EngineEvent::AudioLevel(level));
                    if rms > ACTIVITY_RMS_FLOOR {
                        self.clock.mark_audio();
                    }
                }
                self.push.write(samples);
            }
            Destination::Recording => {
                if let Ok(mut guard) = self.recording.lock() {
                    if let Some(sink) = guard.as_mut() {
                        if let Err(e) = sink.write(samples) {
                            // Report once; keep the session alive.
                            if !self.recording_failed.swap(true, Ordering::SeqCst) {
                                self.events.status(format!("recording write failed: {}", e));
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Everything owned by a running session.
struct Active {
    audio: Arc<AudioSource>,
    push: PushStream,
    translator: Option<Box<dyn SpeechTranslator>>,
    event_pump: Option<tokio::task::JoinHandle<()>>,
    watchdog: Option<WatchdogHandle>,
    clock: Arc<ActivityClock>,
    outputs: Arc<StdMutex<Option<OutputWriters>>>,
    recording: Arc<StdMutex<Option<RecordingSink>>>,
}

struct Actor {
    config: EngineConfig,
    context: EngineContext,
    events: EventBus,
    state: Arc<StdMutex<SessionLifecycleState>>,
    routing: Arc<RoutingCoordinator>,
    commands: mpsc::WeakSender<Command>,
    active: Option<Active>,
}

fn set_state(slot: &Arc<StdMutex<SessionLifecycleState>>, state: SessionLifecycleState) {
    if let Ok(mut guard) = slot.lock() {
        *guard = state;
    }
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Start(reply) => {
                    let result = self.handle_start().await;
                    let _ = reply.send(result);
                }
                Command::Stop(reply) => {
                    let result = self.handle_stop().await;
                    let _ = reply.send(result);
                }
                Command::UpdateConfig(config, reply) => {
                    let result = self.handle_update_config(*config).await;
                    let _ = reply.send(result);
                }
                Command::Reconnect { reason } => {
                    self.handle_reconnect(reason).await;
                }
            }
        }
        // Session handle dropped: release capture/recognizer resources.
        if self.active.is_some() {
            let _ = self.handle_stop().await;
        }
    }

    async fn handle_start(&mut self) -> Result<()> {
        if self.active.is_some() {
            warn!("Session already running");
            self.events.status("session already running");
            return Ok(());
        }
        if let Err(e) = self.config.validate() {
            self.events.status(format!("configuration invalid: {}", e));
            return Err(e);
        }

        set_state(&self.state, SessionLifecycleState::Starting);
        info!("Starting session: {}", self.config.session_id);

        match self.bring_up().await {
            Ok(active) => {
                self.routing.attach(Some(Arc::clone(&active.audio)));
                self.active = Some(active);
                set_state(&self.state, SessionLifecycleState::Listening);
                self.events.status("listening");
                Ok(())
            }
            Err(e) => {
                set_state(&self.state, SessionLifecycleState::Idle);
                self.events.status(format!("failed to start session: {}", e));
                Err(e)
            }
        }
    }

    /// Build audio capture, writers, recognizer, pump, and watchdog.
    /// On failure everything already started is torn down again.
    async fn bring_up(&mut self) -> Result<Active> {
        let config = self.config.clone();

        let recognition = routing::recognition_routing(&config);
        let mut recording_route = routing::recording_routing(&config);

        let clock = Arc::new(ActivityClock::new());
        let (push, audio_rx) = PushStream::new();
        let recording: Arc<StdMutex<Option<RecordingSink>>> = Arc::new(StdMutex::new(None));

        let pipeline = Arc::new(EnginePipeline {
            gain: StdMutex::new(AutoGainProcessor::new(config.gain_preset)),
            level: StdMutex::new(LevelMeter::new()),
            push: push.clone(),
            clock: Arc::clone(&clock),
            recording: Arc::clone(&recording),
            events: self.events.clone(),
            recording_failed: AtomicBool::new(false),
        });

        let capture_config = CaptureConfig {
            sample_rate: config.sample_rate,
            channels: config.channels,
            buffer_duration_ms: 100,
        };
        let audio = Arc::new(AudioSource::new(
            Arc::clone(&self.context.capture),
            capture_config,
            config.chunk_duration_ms,
            pipeline as Arc<dyn ChunkSink>,
        ));

        // Device failures fall back to the default microphone and disable
        // local recording for this session.
        if let Err(e) = audio
            .start(recognition.clone(), recording_route.clone())
            .await
        {
            warn!("Capture start failed: {}", e);
            self.events.status(format!(
                "audio device unavailable ({}); falling back to default microphone, recording disabled",
                e
            ));
            recording_route = AudioRoutingState::silent();
            audio
                .start(AudioRoutingState::default_mic(), AudioRoutingState::silent())
                .await
                .context("default microphone capture failed")?;
        }

        if !recording_route.is_silent() {
            let path = config.output_dir.join(format!("{}.wav", config.session_id));
            match RecordingSink::create(path, config.sample_rate, config.channels) {
                Ok(sink) => {
                    if let Ok(mut guard) = recording.lock() {
                        *guard = Some(sink);
                    }
                }
                Err(e) => {
                    self.events
                        .status(format!("recording disabled: {}", e));
                }
            }
        }

        let outputs = match build_outputs(&config) {
            Ok(outputs) => Arc::new(StdMutex::new(Some(outputs))),
            Err(e) => {
                let _ = audio.stop().await;
                return Err(e);
            }
        };

        let mut translator = match self.context.translator.create(&config, audio_rx) {
            Ok(translator) => translator,
            Err(e) => {
                let _ = audio.stop().await;
                return Err(e).context("failed to create recognizer");
            }
        };
        let backend_events = match translator.start_continuous().await {
            Ok(rx) => rx,
            Err(e) => {
                let _ = audio.stop().await;
                return Err(e).context("failed to start continuous recognition");
            }
        };

        let event_pump = spawn_event_pump(
            backend_events,
            self.events.clone(),
            Arc::clone(&clock),
            Arc::clone(&outputs),
            ParticleFilter::from_config(&config),
        );

        let watchdog = (config.no_response_restart_secs > 0).then(|| {
            watchdog::spawn(
                Arc::clone(&clock),
                Duration::from_secs(config.no_response_restart_secs),
                self.commands.clone(),
            )
        });

        clock.reset();

        Ok(Active {
            audio,
            push,
            translator: Some(translator),
            event_pump: Some(event_pump),
            watchdog,
            clock,
            outputs,
            recording,
        })
    }

    async fn handle_stop(&mut self) -> Result<()> {
        let Some(mut active) = self.active.take() else {
            self.events.status("session not running");
            return Ok(());
        };
        info!("Stopping session: {}", self.config.session_id);
        self.routing.attach(None);

        if let Some(watchdog) = active.watchdog.take() {
            watchdog.cancel();
        }
        if let Some(mut translator) = active.translator.take() {
            if let Err(e) = translator.stop_continuous().await {
                self.events
                    .status(format!("failed to stop recognizer: {}", e));
            }
        }
        if let Some(pump) = active.event_pump.take() {
            if let Err(e) = pump.await {
                warn!("Event pump panicked: {}", e);
            }
        }

        // Close subtitle/transcript writers.
        if let Ok(mut outputs) = active.outputs.lock() {
            outputs.take();
        }

        if let Err(e) = active.audio.stop().await {
            self.events.status(format!("failed to stop capture: {}", e));
        }

        // Hand a finished recording to the transcoder without waiting.
        let sink = active.recording.lock().ok().and_then(|mut guard| guard.take());
        if let Some(sink) = sink {
            match sink.finish() {
                Ok(path) => {
                    self.events.status("transcoding recording in background");
                    let transcoder = Arc::clone(&self.context.transcoder);
                    let events = self.events.clone();
                    tokio::spawn(async move {
                        match transcoder.transcode(&path).await {
                            Ok(artifact) => {
                                events.status(format!("recording ready: {}", artifact.display()));
                            }
                            Err(e) => {
                                // The original WAV is kept on failure.
                                events.status(format!(
                                    "transcode failed ({}); original recording kept at {}",
                                    e,
                                    path.display()
                                ));
                            }
                        }
                    });
                }
                Err(e) => {
                    self.events
                        .status(format!("failed to finalize recording: {}", e));
                }
            }
        }

        set_state(&self.state, SessionLifecycleState::Stopped);
        self.events.status("session stopped");
        Ok(())
    }

    async fn handle_update_config(&mut self, config: EngineConfig) -> Result<()> {
        let was_active = self.active.is_some();
        if was_active {
            self.handle_stop().await?;
        }
        self.config = config;
        if let Err(e) = self.config.validate() {
            // Remain Stopped; no restart attempt.
            self.events.status(format!("configuration invalid: {}", e));
            return Err(e);
        }
        if was_active {
            self.handle_start().await
        } else {
            Ok(())
        }
    }

    /// Rebuild the recognizer on the existing audio stream. The audio
    /// source is never torn down here.
    async fn handle_reconnect(&mut self, reason: String) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        set_state(&self.state, SessionLifecycleState::Reconnecting);
        self.events
            .publish(EngineEvent::ReconnectTriggered { reason: reason.clone() });
        info!("Reconnecting recognizer: {}", reason);

        if let Some(mut translator) = active.translator.take() {
            if let Err(e) = translator.stop_continuous().await {
                self.events
                    .status(format!("failed to stop stale recognizer: {}", e));
            }
        }
        if let Some(pump) = active.event_pump.take() {
            if let Err(e) = pump.await {
                warn!("Event pump panicked: {}", e);
            }
        }

        let audio_rx = active.push.rebind();
        let outcome = self
            .context
            .translator
            .create(&self.config, audio_rx)
            .context("failed to create recognizer");
        let outcome = match outcome {
            Ok(mut translator) => match translator.start_continuous().await {
                Ok(rx) => Ok((translator, rx)),
                Err(e) => Err(e.context("failed to restart continuous recognition")),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok((translator, backend_events)) => {
                active.translator = Some(translator);
                active.event_pump = Some(spawn_event_pump(
                    backend_events,
                    self.events.clone(),
                    Arc::clone(&active.clock),
                    Arc::clone(&active.outputs),
                    ParticleFilter::from_config(&self.config),
                ));
                active.clock.reset();
                set_state(&self.state, SessionLifecycleState::Listening);
                self.events.status("reconnected");
            }
            Err(e) => {
                // Best effort: stay Listening. The watchdog will not trip
                // again until a healthy or silent verdict resets its
                // stall episode.
                set_state(&self.state, SessionLifecycleState::Listening);
                self.events.status(format!("reconnect failed: {}", e));
            }
        }
    }
}

fn build_outputs(config: &EngineConfig) -> Result<OutputWriters> {
    let base = config.output_dir.join(&config.session_id);
    let srt = config
        .export
        .srt
        .then(|| SrtWriter::create(&base.with_extension("srt")))
        .transpose()?;
    let vtt = config
        .export
        .vtt
        .then(|| VttWriter::create(&base.with_extension("vtt")))
        .transpose()?;
    let transcript = config
        .export
        .transcript
        .then(|| TranscriptWriter::open(&base.with_extension("txt")))
        .transpose()?;
    Ok(OutputWriters {
        emitter: SubtitleEmitter::new(srt, vtt),
        transcript,
    })
}

fn spawn_event_pump(
    mut backend_events: mpsc::Receiver<RecognitionEvent>,
    events: EventBus,
    clock: Arc<ActivityClock>,
    outputs: Arc<StdMutex<Option<OutputWriters>>>,
    filter: Option<ParticleFilter>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let filter_text = |text: &str| match &filter {
            Some(filter) => filter.apply(text),
            None => text.to_string(),
        };

        while let Some(event) = backend_events.recv().await {
            match event {
                RecognitionEvent::SessionStarted { backend_session_id } => {
                    events.status(format!("backend session started: {}", backend_session_id));
                }
                RecognitionEvent::SessionStopped => {
                    events.status("backend session stopped");
                }
                RecognitionEvent::Canceled { reason } => {
                    // Transient; status only, no state change.
                    events.status(format!("recognition canceled: {}", reason));
                }
                RecognitionEvent::Recognizing(result) => {
                    clock.mark_recognition();
                    events.publish(EngineEvent::Interim(TranslationItem {
                        timestamp: Utc::now(),
                        original_text: filter_text(&result.original),
                        translated_text: result.translated,
                        written_to_file: false,
                    }));
                }
                RecognitionEvent::Recognized(result) => {
                    clock.mark_recognition();
                    let item = persist_final(&events, &outputs, &filter_text, result);
                    events.publish(EngineEvent::Final(item));
                }
            }
        }
    })
}

/// Write a final result to the transcript and subtitle files.
fn persist_final(
    events: &EventBus,
    outputs: &Arc<StdMutex<Option<OutputWriters>>>,
    filter_text: &dyn Fn(&str) -> String,
    result: RecognitionResult,
) -> TranslationItem {
    let timestamp = Utc::now();
    let original = filter_text(&result.original);
    let mut written = false;

    if let Ok(mut guard) = outputs.lock() {
        if let Some(out) = guard.as_mut() {
            if let Some(transcript) = out.transcript.as_mut() {
                match transcript.append(timestamp, &original, &result.translated) {
                    Ok(()) => written = true,
                    Err(e) => events.status(format!("transcript write failed: {}", e)),
                }
            }
            match out
                .emitter
                .emit(&result.translated, result.offset_ticks, result.duration_ticks)
            {
                Ok(Some(_)) => written = true,
                Ok(None) => {}
                Err(e) => events.status(format!("subtitle write failed: {}", e)),
            }
        }
    }

    TranslationItem {
        timestamp,
        original_text: original,
        translated_text: result.translated,
        written_to_file: written,
    }
}

/// Public handle to the session engine.
///
/// Must be created inside a Tokio runtime; the actor task lives as long as
/// the handle (dropping the handle stops the actor after it cleans up).
pub struct RecognitionSession {
    commands: mpsc::Sender<Command>,
    events: EventBus,
    state: Arc<StdMutex<SessionLifecycleState>>,
    routing: Arc<RoutingCoordinator>,
}

impl RecognitionSession {
    pub fn new(config: EngineConfig, context: EngineContext) -> Self {
        let events = EventBus::new();
        let state = Arc::new(StdMutex::new(SessionLifecycleState::Idle));
        let routing = Arc::new(RoutingCoordinator::new(events.clone()));
        let (tx, rx) = mpsc::channel(16);

        let actor = Actor {
            config,
            context,
            events: events.clone(),
            state: Arc::clone(&state),
            routing: Arc::clone(&routing),
            commands: tx.downgrade(),
            active: None,
        };
        tokio::spawn(actor.run(rx));

        Self {
            commands: tx,
            events,
            state,
            routing,
        }
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionLifecycleState {
        self.state
            .lock()
            .map(|guard| *guard)
            .unwrap_or(SessionLifecycleState::Stopped)
    }

    /// The live-routing coordinator for this session.
    pub fn routing(&self) -> &RoutingCoordinator {
        &self.routing
    }

    /// Request a debounced routing change from a configuration snapshot.
    pub fn request_routing(&self, config: EngineConfig) {
        self.routing.request(config);
    }

    pub async fn start(&self) -> Result<()> {
        self.send(Command::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    pub async fn update_config(&self, config: EngineConfig) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::UpdateConfig(Box::new(config), tx))
            .await
            .map_err(|_| anyhow!("session actor is gone"))?;
        rx.await.map_err(|_| anyhow!("session actor dropped the reply"))?
    }

    async fn send(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<()>>) -> Command,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| anyhow!("session actor is gone"))?;
        rx.await.map_err(|_| anyhow!("session actor dropped the reply"))?
    }
}
