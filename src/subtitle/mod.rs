// Subtitle cue synthesis.
//
// A recognized utterance becomes a cue with monotonic, non-overlapping
// timestamps even when the backend omits its timing payload. Cues are
// persisted to SRT and/or VTT immediately.

pub mod writer;

pub use writer::{SrtWriter, TranscriptWriter, VttWriter};

use anyhow::Result;
use std::time::{Duration, Instant};

use crate::backend::TICKS_PER_MILLISECOND;

/// Cues are never shorter than this.
pub const MIN_CUE_DURATION: Duration = Duration::from_millis(300);

/// Gap estimates for untimed cues are clamped to this ceiling.
const MAX_GAP_ESTIMATE: Duration = Duration::from_secs(10);

/// One emitted subtitle cue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleCue {
    /// 1-based index
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

/// Synthesizes cues and writes them to the active subtitle files.
///
/// Invariants maintained across every emitted sequence:
/// `cue[i+1].start >= cue[i].end` and `cue.end > cue.start`.
pub struct SubtitleEmitter {
    index: usize,
    last_cue_end: Duration,
    last_emit: Option<Instant>,
    srt: Option<SrtWriter>,
    vtt: Option<VttWriter>,
}

impl SubtitleEmitter {
    pub fn new(srt: Option<SrtWriter>, vtt: Option<VttWriter>) -> Self {
        Self {
            index: 0,
            last_cue_end: Duration::ZERO,
            last_emit: None,
            srt,
            vtt,
        }
    }

    /// Emit a cue for a final utterance. Returns None for empty text.
    ///
    /// `offset_ticks`/`duration_ticks` are backend timing in 100 ns ticks;
    /// when either is missing the cue is laid out gaplessly after the
    /// previous one using the measured emission gap.
    pub fn emit(
        &mut self,
        text: &str,
        offset_ticks: Option<u64>,
        duration_ticks: Option<u64>,
    ) -> Result<Option<SubtitleCue>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let (mut start, mut end) = match (offset_ticks, duration_ticks) {
            (Some(offset), Some(duration)) => {
                let start = ticks_to_duration(offset);
                (start, start + ticks_to_duration(duration))
            }
            _ => {
                let gap = self
                    .last_emit
                    .map(|at| at.elapsed())
                    .unwrap_or(MIN_CUE_DURATION)
                    .clamp(MIN_CUE_DURATION, MAX_GAP_ESTIMATE);
                (self.last_cue_end, self.last_cue_end + gap)
            }
        };

        // No overlap with the previous cue, and a real duration always.
        if start < self.last_cue_end {
            start = self.last_cue_end;
        }
        if end < start + MIN_CUE_DURATION {
            end = start + MIN_CUE_DURATION;
        }

        self.index += 1;
        let cue = SubtitleCue {
            index: self.index,
            start,
            end,
            text: text.to_string(),
        };

        if let Some(srt) = self.srt.as_mut() {
            srt.write_cue(&cue)?;
        }
        if let Some(vtt) = self.vtt.as_mut() {
            vtt.write_cue(&cue)?;
        }

        self.last_cue_end = end;
        self.last_emit = Some(Instant::now());
        Ok(Some(cue))
    }
}

fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_millis(ticks / TICKS_PER_MILLISECOND)
        + Duration::from_nanos((ticks % TICKS_PER_MILLISECOND) * 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_conversion() {
        assert_eq!(ticks_to_duration(1_000_000), Duration::from_millis(100));
        assert_eq!(ticks_to_duration(10_000_000), Duration::from_secs(1));
        assert_eq!(ticks_to_duration(15), Duration::from_nanos(1500));
    }

    #[test]
    fn empty_text_emits_nothing() {
        let mut emitter = SubtitleEmitter::new(None, None);
        assert!(emitter.emit("  ", None, None).unwrap().is_none());
        assert!(emitter.emit("", Some(0), Some(1)).unwrap().is_none());
    }

    #[test]
    fn untimed_cues_are_gapless_with_min_duration() {
        let mut emitter = SubtitleEmitter::new(None, None);
        let first = emitter.emit("one", None, None).unwrap().unwrap();
        let second = emitter.emit("two", None, None).unwrap().unwrap();

        assert_eq!(second.start, first.end);
        assert!(first.end - first.start >= MIN_CUE_DURATION);
        assert!(second.end - second.start >= MIN_CUE_DURATION);
    }

    #[test]
    fn backend_timing_is_respected() {
        let mut emitter = SubtitleEmitter::new(None, None);
        let cue = emitter
            .emit("hello", Some(1_000_000), Some(10_000_000))
            .unwrap()
            .unwrap();
        assert_eq!(cue.start, Duration::from_millis(100));
        assert_eq!(cue.end, Duration::from_millis(1100));
    }

    #[test]
    fn overlapping_backend_timing_is_clamped() {
        let mut emitter = SubtitleEmitter::new(None, None);
        emitter
            .emit("first", Some(0), Some(20_000_000)) // 0s - 2s
            .unwrap();
        let cue = emitter
            .emit("second", Some(10_000_000), Some(5_000_000)) // 1s - 1.5s, overlaps
            .unwrap()
            .unwrap();
        assert_eq!(cue.start, Duration::from_secs(2));
        assert_eq!(cue.end, Duration::from_secs(2) + MIN_CUE_DURATION);
    }

    #[test]
    fn index_is_one_based_and_increments() {
        let mut emitter = SubtitleEmitter::new(None, None);
        assert_eq!(emitter.emit("a", None, None).unwrap().unwrap().index, 1);
        assert_eq!(emitter.emit("b", None, None).unwrap().unwrap().index, 2);
        // Skipped (empty) text does not consume an index.
        assert!(emitter.emit("", None, None).unwrap().is_none());
        assert_eq!(emitter.emit("c", None, None).unwrap().unwrap().index, 3);
    }
}
