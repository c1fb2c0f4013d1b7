// Typed engine events and the subscriber list that carries them.
//
// The engine never calls into UI code; everything it produces travels
// through this bus. Failures inside the engine surface here as status
// messages rather than crossing the boundary as errors.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// One recognition result, interim or final.
///
/// Interim items are transient and never persisted; final items are written
/// to the transcript/subtitle files before they are published.
#[derive(Debug, Clone)]
pub struct TranslationItem {
    pub timestamp: DateTime<Utc>,
    pub original_text: String,
    pub translated_text: String,
    /// Whether this item was persisted (always false for interims)
    pub written_to_file: bool,
}

/// Everything the engine publishes to its subscribers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Interim (in-progress) translation
    Interim(TranslationItem),
    /// Final translation
    Final(TranslationItem),
    /// Human-readable status message
    Status(String),
    /// The watchdog or a config change forced a recognizer rebuild
    ReconnectTriggered { reason: String },
    /// Smoothed capture level in 0..1
    AudioLevel(f32),
    /// Diagnostics summary (JSON string)
    Diagnostics(String),
}

/// Typed subscriber list decoupling the engine from any dispatch mechanism.
///
/// Subscribers that drop their receiver are pruned on the next publish.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<EngineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    pub fn publish(&self, event: EngineEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Publish a status message (and log it).
    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("status: {}", message);
        self.publish(EngineEvent::Status(message));
    }
}
