// Adaptive gain control over raw PCM16 buffers.
//
// The processor measures short-window RMS per chunk, derives a target gain
// toward a configured RMS level, smooths it with an EMA, and applies it in
// place with saturation. A separate level meter feeds the audio-level event
// and the watchdog's activity detection.

use crate::config::GainPreset;

/// Guard against division by zero on silent buffers.
const RMS_EPSILON: f32 = 1e-4;

/// Normalized RMS above which a chunk counts as audio activity.
pub const ACTIVITY_RMS_FLOOR: f32 = 0.005;

/// Numeric parameters behind a gain preset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainParams {
    /// Desired RMS level, normalized to [0, 1]
    pub target_rms: f32,
    pub min_gain: f32,
    pub max_gain: f32,
    /// EMA factor: 0 = frozen, 1 = instant jump
    pub smoothing: f32,
}

impl GainParams {
    /// Parameters for a preset; `Off` has none (processing disabled).
    pub fn for_preset(preset: GainPreset) -> Option<Self> {
        match preset {
            GainPreset::Off => None,
            GainPreset::Low => Some(Self {
                target_rms: 0.08,
                min_gain: 0.5,
                max_gain: 2.0,
                smoothing: 0.10,
            }),
            GainPreset::Medium => Some(Self {
                target_rms: 0.12,
                min_gain: 0.25,
                max_gain: 4.0,
                smoothing: 0.15,
            }),
            GainPreset::High => Some(Self {
                target_rms: 0.20,
                min_gain: 0.1,
                max_gain: 8.0,
                smoothing: 0.25,
            }),
        }
    }
}

/// RMS-based gain smoothing applied in place to PCM16 buffers.
///
/// The smoothed gain persists across chunks for the lifetime of one
/// processor instance; a configuration change builds a fresh processor.
pub struct AutoGainProcessor {
    params: Option<GainParams>,
    smoothed_gain: f32,
}

impl AutoGainProcessor {
    pub fn new(preset: GainPreset) -> Self {
        Self::with_params(GainParams::for_preset(preset))
    }

    pub fn with_params(params: Option<GainParams>) -> Self {
        Self {
            params,
            smoothed_gain: 1.0,
        }
    }

    /// Whether processing is active (preset is not `Off`).
    pub fn is_enabled(&self) -> bool {
        self.params.is_some()
    }

    /// Current smoothed gain factor.
    pub fn smoothed_gain(&self) -> f32 {
        self.smoothed_gain
    }

    /// Process one chunk in place; returns the gain that was applied.
    ///
    /// Samples are saturated to the i16 range, never wrapped.
    pub fn process(&mut self, samples: &mut [i16]) -> f32 {
        let Some(params) = self.params else {
            return 1.0;
        };
        if samples.is_empty() {
            return self.smoothed_gain;
        }

        let measured = normalized_rms(samples);
        let target = (params.target_rms / measured.max(RMS_EPSILON))
            .clamp(params.min_gain, params.max_gain);

        self.smoothed_gain += params.smoothing * (target - self.smoothed_gain);

        let gain = self.smoothed_gain;
        for sample in samples.iter_mut() {
            let scaled = (*sample as f32 * gain).round();
            *sample = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        }
        gain
    }
}

/// RMS of a PCM16 buffer normalized to [0, 1].
pub fn normalized_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let n = s as f64 / i16::MAX as f64;
            n * n
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// EMA-smoothed audio level for the 0..1 level event.
pub struct LevelMeter {
    smoothed: f32,
    alpha: f32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self {
            smoothed: 0.0,
            alpha: 0.3,
        }
    }

    /// Feed one chunk; returns the smoothed level and the raw chunk RMS.
    pub fn update(&mut self, samples: &[i16]) -> (f32, f32) {
        let rms = normalized_rms(samples);
        self.smoothed += self.alpha * (rms - self.smoothed);
        (self.smoothed.clamp(0.0, 1.0), rms)
    }

    pub fn level(&self) -> f32 {
        self.smoothed.clamp(0.0, 1.0)
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}
