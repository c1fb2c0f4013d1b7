// No-response watchdog.
//
// The backend can silently stop producing results while audio keeps
// flowing. The watchdog polls the activity clock and, when recognition is
// stale but audio is recent, forces one reconnect per violation episode.
// Genuine silence (no audio activity either) is never treated as a stall.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use super::Command;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The configured threshold is never allowed below this.
const MIN_THRESHOLD: Duration = Duration::from_secs(1);

/// Timestamps of the last observed audio activity and recognition event,
/// in milliseconds since the clock's epoch.
pub struct ActivityClock {
    epoch: Instant,
    last_audio_ms: AtomicU64,
    last_recognition_ms: AtomicU64,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_audio_ms: AtomicU64::new(0),
            last_recognition_ms: AtomicU64::new(0),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn mark_audio(&self) {
        self.last_audio_ms.store(self.now_ms(), Ordering::SeqCst);
    }

    pub fn mark_recognition(&self) {
        self.last_recognition_ms
            .store(self.now_ms(), Ordering::SeqCst);
    }

    /// Reset both marks to now (fresh session or just reconnected).
    pub fn reset(&self) {
        let now = self.now_ms();
        self.last_audio_ms.store(now, Ordering::SeqCst);
        self.last_recognition_ms.store(now, Ordering::SeqCst);
    }

    pub fn last_audio_ms(&self) -> u64 {
        self.last_audio_ms.load(Ordering::SeqCst)
    }

    pub fn last_recognition_ms(&self) -> u64 {
        self.last_recognition_ms.load(Ordering::SeqCst)
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Recognition is keeping up
    Healthy,
    /// No recent audio either: legitimate silence, no action
    Silence,
    /// Audio is flowing but recognition has gone quiet
    Stalled,
}

/// Pure stall check over millisecond timestamps.
pub fn check(now_ms: u64, last_audio_ms: u64, last_recognition_ms: u64, threshold: Duration) -> Verdict {
    let threshold_ms = threshold.max(MIN_THRESHOLD).as_millis() as u64;
    if now_ms.saturating_sub(last_audio_ms) > threshold_ms {
        Verdict::Silence
    } else if now_ms.saturating_sub(last_recognition_ms) > threshold_ms {
        Verdict::Stalled
    } else {
        Verdict::Healthy
    }
}

/// Handle to a running watchdog loop. Safe to cancel multiple times.
pub struct WatchdogHandle {
    running: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl WatchdogHandle {
    pub fn cancel(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}

/// Spawn the polling loop. A stall enqueues one reconnect command per
/// violation episode; the episode resets once the clock looks healthy or
/// silent again.
pub fn spawn(
    clock: Arc<ActivityClock>,
    threshold: Duration,
    commands: mpsc::WeakSender<Command>,
) -> WatchdogHandle {
    let running = Arc::new(AtomicBool::new(true));
    let loop_flag = Arc::clone(&running);

    let task = tokio::spawn(async move {
        debug!("Watchdog started (threshold {:?})", threshold.max(MIN_THRESHOLD));
        let mut tripped = false;

        while loop_flag.load(Ordering::SeqCst) {
            tokio::time::sleep(POLL_INTERVAL).await;

            let verdict = check(
                clock.now_ms(),
                clock.last_audio_ms(),
                clock.last_recognition_ms(),
                threshold,
            );
            match verdict {
                Verdict::Stalled if !tripped => {
                    tripped = true;
                    info!("Watchdog: recognition stalled while audio is active");
                    let reason = "no recognition results while audio is active".to_string();
                    // Weak sender: never keeps the session actor alive.
                    let Some(tx) = commands.upgrade() else { break };
                    if tx.send(Command::Reconnect { reason }).await.is_err() {
                        break;
                    }
                }
                Verdict::Healthy | Verdict::Silence => {
                    tripped = false;
                }
                Verdict::Stalled => {}
            }
        }
        debug!("Watchdog stopped");
    });

    WatchdogHandle { running, task }
}
