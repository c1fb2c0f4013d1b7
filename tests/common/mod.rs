// Shared test doubles: a tone-generating capture factory, a scripted
// recognizer, and a no-op transcoder.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use lingostream::audio::{CaptureBackend, CaptureConfig, CaptureFactory, CaptureLeg, PcmChunk};
use lingostream::backend::{
    AudioStreamReceiver, RecognitionEvent, RecognitionResult, SpeechTranslator, TranslatorFactory,
};
use lingostream::config::{BackendCredentials, EngineConfig};
use lingostream::recording::Transcoder;
use lingostream::session::EngineContext;

/// Emits constant-amplitude PCM frames until stopped.
pub struct ToneCapture {
    leg: CaptureLeg,
    config: CaptureConfig,
    amplitude: i16,
    running: Arc<AtomicBool>,
    task: Option<tokio::task::JoinHandle<()>>,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl CaptureBackend for ToneCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<PcmChunk>> {
        let (tx, rx) = mpsc::channel(32);
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let leg = self.leg;
        let amplitude = self.amplitude;
        let sample_rate = self.config.sample_rate;
        let channels = self.config.channels;
        let frame_ms = self.config.buffer_duration_ms;
        let frame_len = (sample_rate as u64 * channels as u64 * frame_ms / 1000) as usize;

        self.task = Some(tokio::spawn(async move {
            let mut timestamp_ms = 0u64;
            while running.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(frame_ms)).await;
                let frame = PcmChunk {
                    samples: vec![amplitude; frame_len],
                    sample_rate,
                    channels,
                    timestamp_ms,
                    leg,
                };
                timestamp_ms += frame_ms;
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        }));
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "tone"
    }
}

/// Capture factory producing `ToneCapture` backends; can be told to fail
/// opens for specific legs and records every open it serves.
pub struct MockCaptureFactory {
    amplitude: i16,
    fail_legs: Mutex<HashSet<CaptureLeg>>,
    opened: Mutex<Vec<(CaptureLeg, Option<String>)>>,
    open_count: AtomicUsize,
    stops: Arc<AtomicUsize>,
}

impl MockCaptureFactory {
    pub fn tone(amplitude: i16) -> Arc<Self> {
        Arc::new(Self {
            amplitude,
            fail_legs: Mutex::new(HashSet::new()),
            opened: Mutex::new(Vec::new()),
            open_count: AtomicUsize::new(0),
            stops: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn silent() -> Arc<Self> {
        Self::tone(0)
    }

    pub fn fail_leg(&self, leg: CaptureLeg) {
        self.fail_legs.lock().unwrap().insert(leg);
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    /// Number of `stop()` calls across every backend this factory opened.
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> Vec<(CaptureLeg, Option<String>)> {
        self.opened.lock().unwrap().clone()
    }
}

impl CaptureFactory for MockCaptureFactory {
    fn open(
        &self,
        leg: CaptureLeg,
        device_id: Option<&str>,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureBackend>> {
        if self.fail_legs.lock().unwrap().contains(&leg) {
            return Err(anyhow!("device unavailable: {:?}", leg));
        }
        self.open_count.fetch_add(1, Ordering::SeqCst);
        self.opened
            .lock()
            .unwrap()
            .push((leg, device_id.map(str::to_owned)));
        Ok(Box::new(ToneCapture {
            leg,
            config: config.clone(),
            amplitude: self.amplitude,
            running: Arc::new(AtomicBool::new(false)),
            task: None,
            stops: Arc::clone(&self.stops),
        }))
    }
}

/// Plays back a fixed event script, then keeps the stream open until
/// stopped. Pushed audio is drained and discarded.
pub struct ScriptedTranslator {
    script: Vec<RecognitionEvent>,
    audio: Option<AudioStreamReceiver>,
    keep_open: Option<mpsc::Sender<RecognitionEvent>>,
}

#[async_trait]
impl SpeechTranslator for ScriptedTranslator {
    async fn start_continuous(&mut self) -> Result<mpsc::Receiver<RecognitionEvent>> {
        let (tx, rx) = mpsc::channel(64);
        if let Some(mut audio) = self.audio.take() {
            tokio::spawn(async move { while audio.recv().await.is_some() {} });
        }
        let _ = tx
            .send(RecognitionEvent::SessionStarted {
                backend_session_id: "mock-backend".to_string(),
            })
            .await;
        for event in self.script.drain(..) {
            let _ = tx.send(event).await;
        }
        self.keep_open = Some(tx);
        Ok(rx)
    }

    async fn stop_continuous(&mut self) -> Result<()> {
        self.keep_open = None;
        Ok(())
    }
}

/// Hands out `ScriptedTranslator`s and counts how many were created
/// (one per session start plus one per reconnect).
pub struct ScriptedTranslatorFactory {
    scripts: Mutex<VecDeque<Vec<RecognitionEvent>>>,
    created: AtomicUsize,
    fail_create: AtomicBool,
}

impl ScriptedTranslatorFactory {
    pub fn empty() -> Arc<Self> {
        Self::with_scripts(Vec::new())
    }

    /// One script per recognizer creation, in order; later creations get
    /// an empty script.
    pub fn with_scripts(scripts: Vec<Vec<RecognitionEvent>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            created: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
        })
    }

    pub fn fail_next_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl TranslatorFactory for ScriptedTranslatorFactory {
    fn create(
        &self,
        _config: &EngineConfig,
        audio: AudioStreamReceiver,
    ) -> Result<Box<dyn SpeechTranslator>> {
        if self.fail_create.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("backend unreachable"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::new(ScriptedTranslator {
            script,
            audio: Some(audio),
            keep_open: None,
        }))
    }
}

/// Pretends to transcode by renaming the extension in the returned path.
pub struct NoopTranscoder;

#[async_trait]
impl Transcoder for NoopTranscoder {
    async fn transcode(&self, wav_path: &Path) -> Result<PathBuf> {
        Ok(wav_path.with_extension("m4a"))
    }
}

pub fn final_event(original: &str, translated: &str) -> RecognitionEvent {
    RecognitionEvent::Recognized(RecognitionResult {
        original: original.to_string(),
        translated: translated.to_string(),
        offset_ticks: None,
        duration_ticks: None,
    })
}

pub fn interim_event(original: &str, translated: &str) -> RecognitionEvent {
    RecognitionEvent::Recognizing(RecognitionResult {
        original: original.to_string(),
        translated: translated.to_string(),
        offset_ticks: None,
        duration_ticks: None,
    })
}

/// A startable configuration writing its outputs under `dir`.
pub fn test_config(dir: &Path) -> EngineConfig {
    EngineConfig {
        session_id: "test-session".to_string(),
        credentials: BackendCredentials {
            key: "test-key".into(),
            region: "test-region".into(),
        },
        output_dir: dir.to_path_buf(),
        ..EngineConfig::default()
    }
}

pub fn test_context(
    capture: Arc<MockCaptureFactory>,
    translator: Arc<ScriptedTranslatorFactory>,
) -> EngineContext {
    EngineContext {
        capture,
        translator,
        transcoder: Arc::new(NoopTranscoder),
    }
}
