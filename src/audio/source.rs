// Capture-leg lifecycle and hot-swap.
//
// An AudioSource owns one or two capture legs (microphone, loopback) and
// delivers fixed-duration PCM16 chunks to a sink, split into two
// destinations: recognition and local recording. Routing changes are
// applied either in place (crossfade, same legs and devices) or as a full
// graph rebuild (legs added/removed or devices changed). The swap is
// serialized by one lock and the old graph drains its final partial chunk
// before disposal.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::capture::{
    AudioRoutingState, CaptureBackend, CaptureConfig, CaptureFactory, CaptureLeg, PcmChunk,
};
use super::mix::{ChunkAssembler, DestinationMixer};

/// Delivery destination for a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Recognition,
    Recording,
}

/// Receives fixed-duration chunks on the audio pump task.
///
/// Implementations must never block for long and must not panic; panics are
/// contained and discarded to protect the capture path.
pub trait ChunkSink: Send + Sync {
    fn on_chunk(&self, destination: Destination, samples: &mut [i16]);
}

/// A routing mutation for both destinations.
#[derive(Debug, Clone)]
pub struct RoutingChange {
    pub recognition: AudioRoutingState,
    pub recording: AudioRoutingState,
    pub fade_ms: u64,
}

/// How a routing change was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingApplied {
    Unchanged,
    Crossfade,
    Rebuild,
}

pub const MIN_FADE_MS: u64 = 10;
pub const MAX_FADE_MS: u64 = 50;

/// Linear gain ramp evaluated against wall-clock time.
#[derive(Debug, Clone, Copy)]
struct GainRamp {
    from: f32,
    to: f32,
    started: Instant,
    duration_ms: u64,
}

impl GainRamp {
    fn hold(value: f32) -> Self {
        Self {
            from: value,
            to: value,
            started: Instant::now(),
            duration_ms: 0,
        }
    }

    fn fade(from: f32, to: f32, duration_ms: u64) -> Self {
        Self {
            from,
            to,
            started: Instant::now(),
            duration_ms,
        }
    }

    fn value_at(&self, now: Instant) -> f32 {
        if self.duration_ms == 0 {
            return self.to;
        }
        let elapsed = now.saturating_duration_since(self.started).as_millis() as f32;
        let t = (elapsed / self.duration_ms as f32).clamp(0.0, 1.0);
        self.from + (self.to - self.from) * t
    }
}

/// State shared between the AudioSource handle and the pump task.
struct Shared {
    /// Enabled legs per destination; bumping `generation` tells the pump to
    /// reload its mixer masks.
    masks: std::sync::Mutex<(Vec<CaptureLeg>, Vec<CaptureLeg>)>,
    generation: AtomicU64,
    /// Bumped per crossfade; a pending departing-leg removal only lands if
    /// no newer crossfade superseded it.
    epoch: AtomicU64,
    ramps: std::sync::Mutex<HashMap<(Destination, CaptureLeg), GainRamp>>,
}

impl Shared {
    fn new(recognition: Vec<CaptureLeg>, recording: Vec<CaptureLeg>) -> Self {
        let mut ramps = HashMap::new();
        for leg in &recognition {
            ramps.insert((Destination::Recognition, *leg), GainRamp::hold(1.0));
        }
        for leg in &recording {
            ramps.insert((Destination::Recording, *leg), GainRamp::hold(1.0));
        }
        Self {
            masks: std::sync::Mutex::new((recognition, recording)),
            generation: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            ramps: std::sync::Mutex::new(ramps),
        }
    }

    fn gain(&self, destination: Destination, leg: CaptureLeg, now: Instant) -> f32 {
        self.ramps
            .lock()
            .map(|ramps| {
                ramps
                    .get(&(destination, leg))
                    .map(|r| r.value_at(now))
                    .unwrap_or(1.0)
            })
            .unwrap_or(1.0)
    }

    /// Retarget the per-leg gain ramps toward the new masks. Joining legs
    /// fade in from their current value; departing legs fade out to silence
    /// and stay in the mask until the fade completes, so they are never cut
    /// mid-sample.
    fn apply_crossfade(
        self: Arc<Self>,
        recognition: Vec<CaptureLeg>,
        recording: Vec<CaptureLeg>,
        fade_ms: u64,
    ) {
        let fade_ms = fade_ms.clamp(MIN_FADE_MS, MAX_FADE_MS);
        let (old_recognition, old_recording) = self
            .masks
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default();
        let departing = |old: &[CaptureLeg], new: &[CaptureLeg]| -> Vec<CaptureLeg> {
            old.iter().filter(|leg| !new.contains(leg)).copied().collect()
        };
        let departing_recognition = departing(&old_recognition, &recognition);
        let departing_recording = departing(&old_recording, &recording);

        {
            let mut ramps = match self.ramps.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let now = Instant::now();
            let mut retarget = |destination: Destination, legs: &[CaptureLeg], to: f32| {
                for leg in legs {
                    let key = (destination, *leg);
                    let entry = ramps
                        .entry(key)
                        .or_insert_with(|| GainRamp::hold(0.0));
                    if (entry.to - to).abs() > f32::EPSILON {
                        *entry = GainRamp::fade(entry.value_at(now), to, fade_ms);
                    }
                }
            };
            retarget(Destination::Recognition, &recognition, 1.0);
            retarget(Destination::Recording, &recording, 1.0);
            retarget(Destination::Recognition, &departing_recognition, 0.0);
            retarget(Destination::Recording, &departing_recording, 0.0);
        }

        // Departing legs keep mixing (at their fading gain) until removal.
        let mut draining_recognition = recognition.clone();
        draining_recognition.extend(departing_recognition.iter().copied());
        let mut draining_recording = recording.clone();
        draining_recording.extend(departing_recording.iter().copied());
        if let Ok(mut masks) = self.masks.lock() {
            *masks = (draining_recognition, draining_recording);
        }
        self.generation.fetch_add(1, Ordering::SeqCst);

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if !departing_recognition.is_empty() || !departing_recording.is_empty() {
            let shared = Arc::clone(&self);
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(fade_ms)).await;
                if shared.epoch.load(Ordering::SeqCst) != epoch {
                    // A newer crossfade owns the masks now.
                    return;
                }
                if let Ok(mut masks) = shared.masks.lock() {
                    *masks = (recognition, recording);
                }
                shared.generation.fetch_add(1, Ordering::SeqCst);
            });
        }
    }
}

struct LegHandle {
    leg: CaptureLeg,
    device_id: Option<String>,
    backend: Box<dyn CaptureBackend>,
}

/// One running capture graph: open legs, their forwarders, and the pump.
struct Graph {
    legs: Vec<LegHandle>,
    forwarders: Vec<tokio::task::JoinHandle<()>>,
    pump: tokio::task::JoinHandle<()>,
    shared: Arc<Shared>,
}

struct Inner {
    graph: Option<Graph>,
    recognition: AudioRoutingState,
    recording: AudioRoutingState,
}

/// Owns the capture legs and delivers fixed-duration chunks to the sink.
pub struct AudioSource {
    factory: Arc<dyn CaptureFactory>,
    capture_config: CaptureConfig,
    chunk_duration_ms: u64,
    sink: Arc<dyn ChunkSink>,
    /// Swap lock: at most one start/stop/routing mutation in flight.
    inner: Mutex<Inner>,
    /// Serializes chunk delivery so graphs never deliver simultaneously.
    deliver_lock: Arc<std::sync::Mutex<()>>,
    rebuild_count: AtomicU64,
    crossfade_count: AtomicU64,
}

impl AudioSource {
    pub fn new(
        factory: Arc<dyn CaptureFactory>,
        capture_config: CaptureConfig,
        chunk_duration_ms: u64,
        sink: Arc<dyn ChunkSink>,
    ) -> Self {
        Self {
            factory,
            capture_config,
            chunk_duration_ms,
            sink,
            inner: Mutex::new(Inner {
                graph: None,
                recognition: AudioRoutingState::silent(),
                recording: AudioRoutingState::silent(),
            }),
            deliver_lock: Arc::new(std::sync::Mutex::new(())),
            rebuild_count: AtomicU64::new(0),
            crossfade_count: AtomicU64::new(0),
        }
    }

    /// Begin capture on the legs the two routings enable.
    pub async fn start(
        &self,
        recognition: AudioRoutingState,
        recording: AudioRoutingState,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.graph.is_some() {
            warn!("Audio source already started");
            return Ok(());
        }
        let graph = self.build_graph(&recognition, &recording).await?;
        inner.graph = Some(graph);
        inner.recognition = recognition;
        inner.recording = recording;
        info!("Audio source started");
        Ok(())
    }

    /// Apply a routing change: crossfade in place when the leg set and
    /// devices are unchanged, full rebuild otherwise.
    pub async fn update_routing(&self, change: RoutingChange) -> Result<RoutingApplied> {
        let mut inner = self.inner.lock().await;
        let graph = inner
            .graph
            .as_ref()
            .context("audio source is not running")?;

        if inner.recognition == change.recognition && inner.recording == change.recording {
            return Ok(RoutingApplied::Unchanged);
        }

        let new_topology = leg_topology(&change.recognition, &change.recording);
        let current_topology: Vec<(CaptureLeg, Option<String>)> = graph
            .legs
            .iter()
            .map(|l| (l.leg, l.device_id.clone()))
            .collect();

        if new_topology == current_topology {
            Arc::clone(&graph.shared).apply_crossfade(
                change.recognition.legs(),
                change.recording.legs(),
                change.fade_ms,
            );
            inner.recognition = change.recognition;
            inner.recording = change.recording;
            self.crossfade_count.fetch_add(1, Ordering::SeqCst);
            debug!("Routing updated in place (crossfade)");
            return Ok(RoutingApplied::Crossfade);
        }

        // Topology changed: build the replacement first, then drain and
        // dispose the old graph. The deliver lock keeps chunk delivery
        // exclusive while both graphs exist.
        let new_graph = self
            .build_graph(&change.recognition, &change.recording)
            .await?;
        let old = inner.graph.replace(new_graph);
        inner.recognition = change.recognition;
        inner.recording = change.recording;
        if let Some(old) = old {
            teardown_graph(old).await;
        }
        self.rebuild_count.fetch_add(1, Ordering::SeqCst);
        info!("Routing updated with full capture rebuild");
        Ok(RoutingApplied::Rebuild)
    }

    /// Stop capture and release the legs. No-op when not running.
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(graph) = inner.graph.take() {
            teardown_graph(graph).await;
            info!("Audio source stopped");
        }
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.graph.is_some()
    }

    /// Currently applied routing states (recognition, recording).
    pub async fn active_routing(&self) -> (AudioRoutingState, AudioRoutingState) {
        let inner = self.inner.lock().await;
        (inner.recognition.clone(), inner.recording.clone())
    }

    /// Number of full topology rebuilds performed so far.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count.load(Ordering::SeqCst)
    }

    /// Number of in-place crossfade updates performed so far.
    pub fn crossfade_count(&self) -> u64 {
        self.crossfade_count.load(Ordering::SeqCst)
    }

    async fn build_graph(
        &self,
        recognition: &AudioRoutingState,
        recording: &AudioRoutingState,
    ) -> Result<Graph> {
        let topology = leg_topology(recognition, recording);
        if topology.is_empty() {
            anyhow::bail!("no capture legs enabled");
        }

        let (frame_tx, frame_rx) = mpsc::channel::<PcmChunk>(64);
        let mut legs = Vec::new();
        let mut forwarders = Vec::new();

        for (leg, device_id) in topology {
            let mut backend = match self
                .factory
                .open(leg, device_id.as_deref(), &self.capture_config)
                .with_context(|| format!("failed to open {:?} capture device", leg))
            {
                Ok(backend) => backend,
                Err(e) => {
                    // Release the legs that did come up before bailing.
                    release_legs(&mut legs).await;
                    return Err(e);
                }
            };
            let mut rx = match backend
                .start()
                .await
                .with_context(|| format!("failed to start {:?} capture", leg))
            {
                Ok(rx) => rx,
                Err(e) => {
                    release_legs(&mut legs).await;
                    return Err(e);
                }
            };

            let tx = frame_tx.clone();
            forwarders.push(tokio::spawn(async move {
                while let Some(frame) = rx.recv().await {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
            }));
            legs.push(LegHandle {
                leg,
                device_id,
                backend,
            });
        }
        // The pump exits once every forwarder has dropped its sender.
        drop(frame_tx);

        let shared = Arc::new(Shared::new(recognition.legs(), recording.legs()));
        let pump = tokio::spawn(run_pump(
            frame_rx,
            Arc::clone(&shared),
            Arc::clone(&self.sink),
            Arc::clone(&self.deliver_lock),
            self.capture_config.sample_rate,
            self.capture_config.channels,
            self.chunk_duration_ms,
        ));

        Ok(Graph {
            legs,
            forwarders,
            pump,
            shared,
        })
    }
}

/// Ordered (leg, device) pairs for the union of two routings. Recognition's
/// device selection wins when both destinations use the same leg.
fn leg_topology(
    recognition: &AudioRoutingState,
    recording: &AudioRoutingState,
) -> Vec<(CaptureLeg, Option<String>)> {
    let mut topology = Vec::new();
    for leg in [CaptureLeg::Microphone, CaptureLeg::Loopback] {
        let in_recognition = recognition.legs().contains(&leg);
        let in_recording = recording.legs().contains(&leg);
        if !in_recognition && !in_recording {
            continue;
        }
        let device = if in_recognition {
            recognition.device_for(leg)
        } else {
            recording.device_for(leg)
        };
        topology.push((leg, device.map(str::to_owned)));
    }
    topology
}

/// Stop every already-started leg (partial-build cleanup).
async fn release_legs(legs: &mut Vec<LegHandle>) {
    for leg in legs.iter_mut() {
        if let Err(e) = leg.backend.stop().await {
            warn!("Failed to stop {:?} capture during cleanup: {}", leg.leg, e);
        }
    }
}

async fn teardown_graph(mut graph: Graph) {
    for leg in graph.legs.iter_mut() {
        if let Err(e) = leg.backend.stop().await {
            warn!("Failed to stop {:?} capture: {}", leg.leg, e);
        }
    }
    for forwarder in graph.forwarders {
        if let Err(e) = forwarder.await {
            warn!("Capture forwarder panicked: {}", e);
        }
    }
    // The pump drains buffered frames and the final partial chunk.
    if let Err(e) = graph.pump.await {
        warn!("Audio pump panicked: {}", e);
    }
}

async fn run_pump(
    mut frame_rx: mpsc::Receiver<PcmChunk>,
    shared: Arc<Shared>,
    sink: Arc<dyn ChunkSink>,
    deliver_lock: Arc<std::sync::Mutex<()>>,
    sample_rate: u32,
    channels: u16,
    chunk_duration_ms: u64,
) {
    let (recognition_legs, recording_legs) = shared
        .masks
        .lock()
        .map(|m| m.clone())
        .unwrap_or_default();
    let mut recognition_mixer = DestinationMixer::new(recognition_legs);
    let mut recording_mixer = DestinationMixer::new(recording_legs);
    let mut recognition_chunks = ChunkAssembler::new(sample_rate, channels, chunk_duration_ms);
    let mut recording_chunks = ChunkAssembler::new(sample_rate, channels, chunk_duration_ms);
    let mut seen_generation = shared.generation.load(Ordering::SeqCst);

    debug!("Audio pump started");

    while let Some(frame) = frame_rx.recv().await {
        let generation = shared.generation.load(Ordering::SeqCst);
        if generation != seen_generation {
            seen_generation = generation;
            if let Ok(masks) = shared.masks.lock() {
                recognition_mixer.set_enabled(masks.0.iter().copied());
                recording_mixer.set_enabled(masks.1.iter().copied());
            }
        }

        let now = Instant::now();
        let recognition_gain =
            |leg: CaptureLeg| shared.gain(Destination::Recognition, leg, now);
        let recording_gain = |leg: CaptureLeg| shared.gain(Destination::Recording, leg, now);

        recognition_mixer.push(&frame);
        recording_mixer.push(&frame);

        while let Some(mixed) = recognition_mixer.mix_next(&recognition_gain) {
            for mut chunk in recognition_chunks.push(&mixed) {
                deliver(&sink, &deliver_lock, Destination::Recognition, &mut chunk);
            }
        }
        while let Some(mixed) = recording_mixer.mix_next(&recording_gain) {
            for mut chunk in recording_chunks.push(&mixed) {
                deliver(&sink, &deliver_lock, Destination::Recording, &mut chunk);
            }
        }
    }

    // Channel closed: drain everything still buffered so the last partial
    // chunk reaches the sink before disposal.
    let now = Instant::now();
    let recognition_gain = |leg: CaptureLeg| shared.gain(Destination::Recognition, leg, now);
    let recording_gain = |leg: CaptureLeg| shared.gain(Destination::Recording, leg, now);
    for mixed in recognition_mixer.flush(&recognition_gain) {
        for mut chunk in recognition_chunks.push(&mixed) {
            deliver(&sink, &deliver_lock, Destination::Recognition, &mut chunk);
        }
    }
    if let Some(mut partial) = recognition_chunks.drain() {
        deliver(&sink, &deliver_lock, Destination::Recognition, &mut partial);
    }
    for mixed in recording_mixer.flush(&recording_gain) {
        for mut chunk in recording_chunks.push(&mixed) {
            deliver(&sink, &deliver_lock, Destination::Recording, &mut chunk);
        }
    }
    if let Some(mut partial) = recording_chunks.drain() {
        deliver(&sink, &deliver_lock, Destination::Recording, &mut partial);
    }

    debug!("Audio pump stopped");
}

/// Deliver one chunk under the delivery lock, containing sink panics.
fn deliver(
    sink: &Arc<dyn ChunkSink>,
    deliver_lock: &std::sync::Mutex<()>,
    destination: Destination,
    chunk: &mut Vec<i16>,
) {
    let _guard = match deliver_lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        sink.on_chunk(destination, chunk.as_mut_slice());
    }));
    if result.is_err() {
        warn!("Chunk sink panicked; chunk discarded");
    }
}
