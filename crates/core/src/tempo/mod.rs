//! One-shot tempo estimate sampled at the start of each track.
//!
//! A [`TempoSession`] collects peak timestamps for a bounded window, then turns
//! the median inter-peak interval into beats per minute. It runs next to the
//! beat detector but keeps its own, looser, peak criterion.

use serde::{Deserialize, Serialize};

use crate::{analysis::mean_absolute_deviation, config::TempoConfig};

/// Outcome of one estimation pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoEstimate {
    /// Estimated tempo, unclamped.
    pub bpm: u32,
    /// Peak timestamps the estimate is based on.
    pub samples: usize,
    /// Fraction of the possible intervals that were observed.
    pub confidence: f32,
}

impl TempoEstimate {
    pub fn fallback(bpm: u32) -> Self {
        Self {
            bpm,
            samples: 0,
            confidence: 0.0,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.samples < 2
    }

    /// Tempo used for animation speed, clamped to `[min_bpm, max_bpm]`.
    pub fn rotation_bpm(&self, min_bpm: f32, max_bpm: f32) -> f32 {
        (self.bpm as f32).clamp(min_bpm, max_bpm)
    }

    pub fn seconds_per_beat(&self, min_bpm: f32, max_bpm: f32) -> f64 {
        60.0 / self.rotation_bpm(min_bpm, max_bpm) as f64
    }
}

/// Derives an estimate from peak timestamps in milliseconds.
///
/// The median is the element at `len / 2` of the sorted intervals, which for
/// even counts picks the upper of the two middle values.
pub fn estimate_from_timestamps(
    timestamps: &[f64],
    max_samples: usize,
    fallback_bpm: u32,
) -> TempoEstimate {
    if timestamps.len() < 2 {
        return TempoEstimate::fallback(fallback_bpm);
    }

    let mut intervals: Vec<f64> = timestamps
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect();
    intervals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let median = intervals[intervals.len() / 2];
    if !median.is_finite() || median <= 0.0 {
        return TempoEstimate::fallback(fallback_bpm);
    }

    let possible = max_samples.saturating_sub(1).max(1) as f32;
    TempoEstimate {
        bpm: (60_000.0 / median).round() as u32,
        samples: timestamps.len(),
        confidence: (intervals.len() as f32 / possible).min(1.0),
    }
}

/// Time-boxed sampling pass tied to one track generation.
#[derive(Debug, Clone)]
pub struct TempoSession {
    config: TempoConfig,
    generation: u64,
    started_ms: Option<f64>,
    last_peak_ms: f64,
    timestamps: Vec<f64>,
    finished: bool,
}

impl TempoSession {
    pub fn new(config: TempoConfig, generation: u64) -> Self {
        let capacity = config.max_samples;
        Self {
            config,
            generation,
            started_ms: None,
            last_peak_ms: f64::NEG_INFINITY,
            timestamps: Vec::with_capacity(capacity),
            finished: false,
        }
    }

    /// Track generation this pass was started for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feeds one frame (or `None` when no tap is available). Returns the
    /// estimate exactly once, on the frame where a bound is reached.
    pub fn sample(&mut self, frame: Option<&[u8]>, now_ms: f64) -> Option<TempoEstimate> {
        if self.finished {
            return None;
        }

        let started = *self.started_ms.get_or_insert(now_ms);

        if let Some(frame) = frame {
            let deviation = mean_absolute_deviation(frame);
            if deviation > self.config.threshold
                && now_ms - self.last_peak_ms > self.config.debounce_ms
                && self.timestamps.len() < self.config.max_samples
            {
                self.timestamps.push(now_ms);
                self.last_peak_ms = now_ms;
            }
        }

        let within_window = now_ms - started < self.config.window_ms;
        if within_window && self.timestamps.len() < self.config.max_samples {
            return None;
        }

        self.finished = true;
        let estimate = estimate_from_timestamps(
            &self.timestamps,
            self.config.max_samples,
            self.config.fallback_bpm,
        );
        tracing::debug!(
            generation = self.generation,
            peaks = self.timestamps.len(),
            bpm = estimate.bpm,
            "tempo pass complete"
        );
        Some(estimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOUD: [u8; 256] = [220; 256];
    const QUIET: [u8; 256] = [128; 256];

    /// Drives a session with 10 ms frames and a single loud frame every
    /// `interval_ms`.
    fn run_periodic(interval_ms: u32, config: TempoConfig) -> (TempoEstimate, f64) {
        let mut session = TempoSession::new(config, 1);
        let mut now = 0u32;
        loop {
            let frame: &[u8] = if now % interval_ms == 0 { &LOUD } else { &QUIET };
            if let Some(estimate) = session.sample(Some(frame), now as f64) {
                return (estimate, now as f64);
            }
            now += 10;
        }
    }

    #[test]
    fn periodic_peaks_yield_their_tempo() {
        let (estimate, finished_at) = run_periodic(500, TempoConfig::default());
        assert_eq!(estimate.bpm, 120);
        assert_eq!(estimate.samples, 9);
        assert_eq!(estimate.confidence, 1.0);
        // Nine peaks at 0, 500, ..., 4000 end the pass early.
        assert_eq!(finished_at, 4_000.0);
    }

    #[test]
    fn slow_peaks_end_at_the_time_bound() {
        let (estimate, finished_at) = run_periodic(1_500, TempoConfig::default());
        assert_eq!(estimate.bpm, 40);
        assert_eq!(estimate.samples, 5);
        assert_eq!(finished_at, 7_000.0);
    }

    #[test]
    fn debounce_merges_close_peaks() {
        let mut session = TempoSession::new(TempoConfig::default(), 1);
        session.sample(Some(&LOUD), 0.0);
        session.sample(Some(&LOUD), 100.0);
        session.sample(Some(&LOUD), 180.0);
        session.sample(Some(&LOUD), 181.0);
        assert_eq!(session.timestamps(), &[0.0, 181.0]);
    }

    #[test]
    fn insufficient_peaks_fall_back() {
        let mut session = TempoSession::new(TempoConfig::default(), 3);
        let mut now = 0.0;
        let estimate = loop {
            let frame: &[u8] = if now == 48.0 { &LOUD } else { &QUIET };
            if let Some(estimate) = session.sample(Some(frame), now) {
                break estimate;
            }
            now += 16.0;
        };
        assert!(estimate.is_fallback());
        assert_eq!(estimate.bpm, 90);
        assert!(session.sample(Some(&LOUD), now + 16.0).is_none());
    }

    #[test]
    fn missing_frames_still_time_out() {
        let mut session = TempoSession::new(TempoConfig::default(), 1);
        assert!(session.sample(None, 1_000.0).is_none());
        assert!(session.sample(None, 7_999.0).is_none());
        let estimate = session.sample(None, 8_000.0).unwrap();
        assert_eq!(estimate, TempoEstimate::fallback(90));
    }

    #[test]
    fn median_picks_upper_middle_for_even_counts() {
        let estimate = estimate_from_timestamps(&[0.0, 400.0, 1_000.0, 1_500.0, 2_250.0], 9, 90);
        // Sorted intervals: 400, 500, 600, 750 -> element 2 is 600 ms.
        assert_eq!(estimate.bpm, 100);
        assert_eq!(estimate.samples, 5);
        assert!((estimate.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn rotation_speed_is_clamped_but_estimate_is_not() {
        let estimate = estimate_from_timestamps(&[0.0, 100.0, 200.0], 9, 90);
        assert_eq!(estimate.bpm, 600);
        assert_eq!(estimate.rotation_bpm(30.0, 220.0), 220.0);
        assert!((estimate.seconds_per_beat(30.0, 220.0) - 60.0 / 220.0).abs() < 1e-9);
    }
}
