use serde::{Deserialize, Serialize};

use crate::config::{BeatConfig, DispersionMeasure, EnergyConfig};

/// Root-mean-square of the centred frame, normalised to `[0, 1]`.
pub fn rms(frame: &[u8]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }

    let sum: f32 = frame
        .iter()
        .map(|&byte| {
            let value = (byte as f32 - 128.0) / 128.0;
            value * value
        })
        .sum();
    (sum / frame.len() as f32).sqrt()
}

/// Mean absolute deviation from the 128 centre, in byte units (`0..=128`).
pub fn mean_absolute_deviation(frame: &[u8]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }

    let sum: u32 = frame.iter().map(|&byte| byte.abs_diff(128) as u32).sum();
    sum as f32 / frame.len() as f32
}

/// Discrete beat, handed to subscribers the instant it fires.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    pub timestamp_ms: f64,
    /// Energy of the frame that fired, in `[0, 1]`.
    pub strength: f32,
}

/// Result of analysing a single frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFrame {
    pub time_ms: f64,
    pub energy: f32,
    pub beat: Option<BeatEvent>,
}

/// Maps a raw amplitude frame onto a perceptual energy value in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct EnergyExtractor {
    config: EnergyConfig,
}

impl EnergyExtractor {
    pub fn new(config: EnergyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EnergyConfig {
        &self.config
    }

    /// Normalised dispersion of the frame before the sensitivity transform.
    pub fn dispersion(&self, frame: &[u8]) -> f32 {
        match self.config.measure {
            DispersionMeasure::Rms => rms(frame),
            DispersionMeasure::MeanAbsoluteDeviation => mean_absolute_deviation(frame) / 128.0,
        }
    }

    pub fn extract(&self, frame: &[u8]) -> f32 {
        let scaled = (self.dispersion(frame) * self.config.scale).max(0.0);
        let energy = scaled.powf(self.config.exponent);
        if energy.is_nan() {
            0.0
        } else {
            energy.clamp(0.0, 1.0)
        }
    }
}

/// Threshold detector with a refractory period between beats.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    extractor: EnergyExtractor,
    threshold: f32,
    refractory_ms: f64,
    last_beat_ms: f64,
}

impl BeatDetector {
    pub fn new(energy: EnergyConfig, beat: &BeatConfig) -> Self {
        Self {
            extractor: EnergyExtractor::new(energy),
            threshold: beat.threshold,
            refractory_ms: beat.refractory_ms.max(0.0),
            last_beat_ms: f64::NEG_INFINITY,
        }
    }

    pub fn extractor(&self) -> &EnergyExtractor {
        &self.extractor
    }

    pub fn refractory_ms(&self) -> f64 {
        self.refractory_ms
    }

    /// Timestamp of the last emitted beat, if any.
    pub fn last_beat_ms(&self) -> Option<f64> {
        self.last_beat_ms.is_finite().then_some(self.last_beat_ms)
    }

    /// Forgets the last beat so the next qualifying frame fires immediately.
    pub fn reset(&mut self) {
        self.last_beat_ms = f64::NEG_INFINITY;
    }

    /// Extracts the frame energy and runs the beat decision on it.
    pub fn process(&mut self, frame: &[u8], now_ms: f64) -> AnalysisFrame {
        let energy = self.extractor.extract(frame);
        AnalysisFrame {
            time_ms: now_ms,
            energy,
            beat: self.detect(energy, now_ms),
        }
    }

    /// Beat decision on an already extracted energy value.
    pub fn detect(&mut self, energy: f32, now_ms: f64) -> Option<BeatEvent> {
        if energy > self.threshold && now_ms - self.last_beat_ms > self.refractory_ms {
            self.last_beat_ms = now_ms;
            tracing::trace!(now_ms, energy, "beat");
            Some(BeatEvent {
                timestamp_ms: now_ms,
                strength: energy.clamp(0.0, 1.0),
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn detector() -> BeatDetector {
        BeatDetector::new(EnergyConfig::default(), &BeatConfig::default())
    }

    #[test]
    fn silence_has_no_energy() {
        let extractor = EnergyExtractor::new(EnergyConfig::default());
        assert_eq!(extractor.extract(&[128; 1024]), 0.0);
        assert_eq!(extractor.extract(&[]), 0.0);
    }

    #[test]
    fn full_scale_frames_saturate() {
        let extractor = EnergyExtractor::new(EnergyConfig::default());
        let frame: Vec<u8> = (0..1024).map(|i| if i % 2 == 0 { 0 } else { 255 }).collect();
        assert_eq!(extractor.extract(&frame), 1.0);
    }

    #[test]
    fn dispersion_measures_agree_on_square_waves() {
        let frame: Vec<u8> = (0..256).map(|i| if i % 2 == 0 { 64 } else { 192 }).collect();
        assert!((rms(&frame) - 0.5).abs() < 1e-6);
        assert!((mean_absolute_deviation(&frame) - 64.0).abs() < 1e-6);

        let mad = EnergyExtractor::new(EnergyConfig {
            measure: DispersionMeasure::MeanAbsoluteDeviation,
            ..Default::default()
        });
        assert!((mad.dispersion(&frame) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn first_loud_frame_fires_immediately() {
        let mut detector = detector();
        let frame = detector.process(&[200; 512], 0.0);
        let beat = frame.beat.expect("first qualifying frame should fire");
        assert_eq!(beat.timestamp_ms, 0.0);
        assert_eq!(beat.strength, frame.energy);
    }

    #[test]
    fn refractory_period_suppresses_double_fire() {
        let mut detector = detector();
        assert!(detector.detect(0.9, 1_000.0).is_some());
        assert!(detector.detect(0.9, 1_100.0).is_none());
        assert!(detector.detect(0.9, 1_140.0).is_none());
        assert!(detector.detect(0.9, 1_141.0).is_some());
        assert_eq!(detector.last_beat_ms(), Some(1_141.0));
    }

    #[test]
    fn silence_never_beats() {
        let mut detector = detector();
        let silence = [128u8; 1024];
        for frame in 0..10_000 {
            let analysis = detector.process(&silence, frame as f64 * 16.0);
            assert!(analysis.beat.is_none());
        }
        assert_eq!(detector.last_beat_ms(), None);
    }

    proptest! {
        #[test]
        fn energy_is_always_normalised(
            frame in prop::collection::vec(any::<u8>(), 0..2048),
            scale in 0.01f32..50.0,
            exponent in 0.1f32..4.0,
            mad in any::<bool>(),
        ) {
            let extractor = EnergyExtractor::new(EnergyConfig {
                measure: if mad { DispersionMeasure::MeanAbsoluteDeviation } else { DispersionMeasure::Rms },
                scale,
                exponent,
            });
            let energy = extractor.extract(&frame);
            prop_assert!((0.0..=1.0).contains(&energy));
        }

        #[test]
        fn beats_respect_the_refractory_period(
            steps in prop::collection::vec((0.0f64..200.0, 0.0f32..1.0), 1..400),
            refractory in 0.0f64..300.0,
        ) {
            let mut detector = BeatDetector::new(
                EnergyConfig::default(),
                &BeatConfig { threshold: 0.11, refractory_ms: refractory },
            );
            let mut now = 0.0;
            let mut last: Option<f64> = None;
            for (delta, energy) in steps {
                now += delta;
                if let Some(beat) = detector.detect(energy, now) {
                    if let Some(previous) = last {
                        prop_assert!(beat.timestamp_ms - previous > refractory);
                    }
                    last = Some(beat.timestamp_ms);
                }
            }
        }
    }
}
