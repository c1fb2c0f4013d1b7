// Streaming translation backend abstraction.
//
// The engine does not talk to any speech service directly; it pushes PCM16
// audio into a push stream and consumes a typed event stream from a
// recognizer created by an injected factory. A reconnect builds a fresh
// recognizer bound to the same push stream, so the capture path never
// changes hands.

use anyhow::Result;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::config::EngineConfig;

/// Backend timing payloads are expressed in 100 ns ticks.
pub const TICKS_PER_MILLISECOND: u64 = 10_000;

/// One recognition result, interim or final.
#[derive(Debug, Clone)]
pub struct RecognitionResult {
    /// Recognized text in the source language
    pub original: String,
    /// Translated text in the target language
    pub translated: String,
    /// Utterance start relative to the audio stream, in 100 ns ticks
    pub offset_ticks: Option<u64>,
    /// Utterance duration in 100 ns ticks
    pub duration_ticks: Option<u64>,
}

/// Events emitted by a continuous recognizer.
#[derive(Debug, Clone)]
pub enum RecognitionEvent {
    SessionStarted { backend_session_id: String },
    SessionStopped,
    /// Interim hypothesis; transient, never persisted
    Recognizing(RecognitionResult),
    /// Final utterance
    Recognized(RecognitionResult),
    /// Transport or service error; not fatal by itself
    Canceled { reason: String },
}

/// Receiver half handed to a recognizer; it reads raw PCM16 buffers.
pub type AudioStreamReceiver = mpsc::UnboundedReceiver<Vec<i16>>;

/// Capture-side handle of the backend push stream.
///
/// Clonable and cheap; `write` never blocks, so it is safe to call from the
/// chunk-delivery path. `rebind` swaps in a fresh channel for a replacement
/// recognizer while existing handles keep working.
#[derive(Clone)]
pub struct PushStream {
    tx: Arc<Mutex<mpsc::UnboundedSender<Vec<i16>>>>,
}

impl PushStream {
    pub fn new() -> (Self, AudioStreamReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Arc::new(Mutex::new(tx)),
            },
            rx,
        )
    }

    /// Push one chunk. Errors (recognizer gone mid-swap) are discarded;
    /// the capture path must never fail on backend state.
    pub fn write(&self, samples: &[i16]) {
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(samples.to_vec());
        }
    }

    /// Bind a fresh receiver to this handle, detaching the previous one.
    pub fn rebind(&self) -> AudioStreamReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut guard) = self.tx.lock() {
            *guard = tx;
        }
        rx
    }
}

/// A continuous speech-translation recognizer.
///
/// `stop_continuous` must close the event stream returned by
/// `start_continuous` so consumers observe end-of-stream.
#[async_trait::async_trait]
pub trait SpeechTranslator: Send {
    /// Begin continuous recognition; returns the event stream.
    async fn start_continuous(&mut self) -> Result<mpsc::Receiver<RecognitionEvent>>;

    /// Stop continuous recognition and close the event stream.
    async fn stop_continuous(&mut self) -> Result<()>;
}

/// Creates recognizers from a configuration snapshot and an audio stream.
///
/// Language selection, silence timeouts, and credentials travel in the
/// snapshot; how they map onto the service is the implementation's concern.
pub trait TranslatorFactory: Send + Sync {
    fn create(
        &self,
        config: &EngineConfig,
        audio: AudioStreamReceiver,
    ) -> Result<Box<dyn SpeechTranslator>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_stream_delivers_samples() {
        let (stream, mut rx) = PushStream::new();
        stream.write(&[1, 2, 3]);
        assert_eq!(rx.recv().await, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn rebind_detaches_old_receiver() {
        let (stream, mut old_rx) = PushStream::new();
        let mut new_rx = stream.rebind();

        stream.write(&[7]);
        assert_eq!(new_rx.recv().await, Some(vec![7]));
        // Old receiver observes end-of-stream, not the new data.
        assert_eq!(old_rx.recv().await, None);
    }

    #[test]
    fn write_after_receiver_drop_is_silent() {
        let (stream, rx) = PushStream::new();
        drop(rx);
        stream.write(&[1]); // must not panic
    }
}
