// Per-destination mixing of capture legs.
//
// A destination (recognition or recording) selects a subset of the active
// legs through its routing mask. Frames from each enabled leg are buffered
// per leg, time-aligned loosely by arrival, and summed with clipping. A leg
// that stalls stops gating delivery once the others lag past a delay cap.
// The masked subset can change at runtime (in-place routing updates), so
// the mixer also applies a per-leg crossfade gain when popping frames.

use std::collections::{HashMap, HashSet, VecDeque};

use super::capture::{CaptureLeg, PcmChunk};

/// A leg lagging more than this behind the newest pushed audio stops
/// gating delivery: buffered frames of the other legs are mixed without it.
const MAX_BUFFER_DELAY_MS: u64 = 400;

/// Buffers and mixes leg frames for one delivery destination.
pub struct DestinationMixer {
    enabled: HashSet<CaptureLeg>,
    buffers: HashMap<CaptureLeg, VecDeque<PcmChunk>>,
    newest_ms: u64,
}

impl DestinationMixer {
    pub fn new(enabled: impl IntoIterator<Item = CaptureLeg>) -> Self {
        Self {
            enabled: enabled.into_iter().collect(),
            buffers: HashMap::new(),
            newest_ms: 0,
        }
    }

    /// Replace the enabled-leg mask (in-place routing update).
    pub fn set_enabled(&mut self, enabled: impl IntoIterator<Item = CaptureLeg>) {
        self.enabled = enabled.into_iter().collect();
        self.buffers.retain(|leg, _| self.enabled.contains(leg));
    }

    pub fn is_enabled(&self, leg: CaptureLeg) -> bool {
        self.enabled.contains(&leg)
    }

    pub fn has_enabled_legs(&self) -> bool {
        !self.enabled.is_empty()
    }

    /// Buffer one frame if its leg is enabled for this destination.
    pub fn push(&mut self, frame: &PcmChunk) {
        if !self.enabled.contains(&frame.leg) {
            return;
        }
        self.newest_ms = self.newest_ms.max(frame.timestamp_ms);
        self.buffers
            .entry(frame.leg)
            .or_default()
            .push_back(frame.clone());
    }

    /// Pop one mixed frame.
    ///
    /// Normally waits until every enabled leg has data buffered so the legs
    /// stay time-aligned. Once the oldest buffered frame lags the newest
    /// pushed audio by more than the delay cap, a stalled leg no longer
    /// gates delivery: the legs that do have data are mixed without it,
    /// which also bounds the healthy legs' buffers. `leg_gain` supplies the
    /// current crossfade gain per leg; `flush` drains the rest.
    pub fn mix_next(&mut self, leg_gain: &dyn Fn(CaptureLeg) -> f32) -> Option<Vec<i16>> {
        if self.enabled.is_empty() {
            return None;
        }
        let all_ready = self
            .enabled
            .iter()
            .all(|leg| self.buffers.get(leg).is_some_and(|b| !b.is_empty()));
        if !all_ready && !self.has_overdue_frame() {
            return None;
        }
        if !all_ready {
            tracing::debug!(
                "Mixing without a stalled leg (newest frame at {}ms)",
                self.newest_ms
            );
        }
        self.pop_and_mix(leg_gain)
    }

    /// Whether some buffered frame has waited past the delay cap.
    fn has_overdue_frame(&self) -> bool {
        self.buffers.values().any(|buffer| {
            buffer
                .front()
                .is_some_and(|f| f.timestamp_ms + MAX_BUFFER_DELAY_MS <= self.newest_ms)
        })
    }

    /// Drain whatever is still buffered, mixing legs that have data.
    pub fn flush(&mut self, leg_gain: &dyn Fn(CaptureLeg) -> f32) -> Vec<Vec<i16>> {
        let mut out = Vec::new();
        while let Some(mixed) = self.pop_and_mix(leg_gain) {
            out.push(mixed);
        }
        out
    }

    fn pop_and_mix(&mut self, leg_gain: &dyn Fn(CaptureLeg) -> f32) -> Option<Vec<i16>> {
        let mut frames: Vec<PcmChunk> = Vec::new();
        for (_, buffer) in self.buffers.iter_mut() {
            if let Some(frame) = buffer.pop_front() {
                frames.push(frame);
            }
        }
        if frames.is_empty() {
            return None;
        }

        let max_len = frames.iter().map(|f| f.samples.len()).max().unwrap_or(0);
        let mut mixed = Vec::with_capacity(max_len);
        for i in 0..max_len {
            let mut sum = 0f32;
            for frame in &frames {
                let sample = frame.samples.get(i).copied().unwrap_or(0);
                sum += sample as f32 * leg_gain(frame.leg);
            }
            mixed.push(sum.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16);
        }
        Some(mixed)
    }
}

/// Accumulates mixed samples into fixed-duration delivery chunks.
pub struct ChunkAssembler {
    chunk_len: usize,
    pending: Vec<i16>,
}

impl ChunkAssembler {
    pub fn new(sample_rate: u32, channels: u16, chunk_duration_ms: u64) -> Self {
        let chunk_len =
            (sample_rate as u64 * channels as u64 * chunk_duration_ms / 1000).max(1) as usize;
        Self {
            chunk_len,
            pending: Vec::with_capacity(chunk_len),
        }
    }

    /// Append samples; returns every full chunk produced.
    pub fn push(&mut self, samples: &[i16]) -> Vec<Vec<i16>> {
        let mut full = Vec::new();
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.chunk_len {
            let rest = self.pending.split_off(self.chunk_len);
            full.push(std::mem::replace(&mut self.pending, rest));
        }
        full
    }

    /// Final partial chunk, delivered on drain so no audio is dropped.
    pub fn drain(&mut self) -> Option<Vec<i16>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}
