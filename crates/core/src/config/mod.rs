use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{RecapError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub playlist: Vec<PlaylistEntry>,
    pub audio: AudioConfig,
    pub energy: EnergyConfig,
    pub beat: BeatConfig,
    pub tempo: TempoConfig,
    pub visual: VisualConfig,
}

impl AppConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Rejects values the analysis pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        let frame_size = self.audio.frame_size;
        if !frame_size.is_power_of_two() || !(32..=32_768).contains(&frame_size) {
            return Err(RecapError::InvalidConfig(format!(
                "audio.frame_size must be a power of two between 32 and 32768, got {frame_size}"
            )));
        }
        if let Some(name) = self.first_non_finite() {
            return Err(RecapError::InvalidConfig(format!(
                "{name} must be a finite number"
            )));
        }
        if !(0.0..=1.0).contains(&self.audio.initial_volume) {
            return Err(RecapError::InvalidConfig(
                "audio.initial_volume must be within [0, 1]".into(),
            ));
        }
        if self.energy.scale <= 0.0 || self.energy.exponent <= 0.0 {
            return Err(RecapError::InvalidConfig(
                "energy.scale and energy.exponent must be positive".into(),
            ));
        }
        if self.beat.refractory_ms < 0.0 {
            return Err(RecapError::InvalidConfig(
                "beat.refractory_ms must not be negative".into(),
            ));
        }
        if self.tempo.max_samples < 2 {
            return Err(RecapError::InvalidConfig(
                "tempo.max_samples must allow at least one interval".into(),
            ));
        }
        if self.tempo.min_bpm <= 0.0 || self.tempo.min_bpm > self.tempo.max_bpm {
            return Err(RecapError::InvalidConfig(
                "tempo.min_bpm must be positive and not above tempo.max_bpm".into(),
            ));
        }
        if self.visual.shift_window_ms <= 0.0
            || self.visual.pulse_duration_ms <= 0.0
            || self.visual.slide_pulse_duration_ms <= 0.0
        {
            return Err(RecapError::InvalidConfig(
                "visual animation windows must be positive".into(),
            ));
        }
        Ok(())
    }

    fn first_non_finite(&self) -> Option<&'static str> {
        let (audio, energy, beat, tempo, visual) =
            (&self.audio, &self.energy, &self.beat, &self.tempo, &self.visual);
        [
            ("audio.initial_volume", f64::from(audio.initial_volume)),
            ("energy.scale", f64::from(energy.scale)),
            ("energy.exponent", f64::from(energy.exponent)),
            ("beat.threshold", f64::from(beat.threshold)),
            ("beat.refractory_ms", beat.refractory_ms),
            ("tempo.window_ms", tempo.window_ms),
            ("tempo.threshold", f64::from(tempo.threshold)),
            ("tempo.debounce_ms", tempo.debounce_ms),
            ("tempo.min_bpm", f64::from(tempo.min_bpm)),
            ("tempo.max_bpm", f64::from(tempo.max_bpm)),
            ("visual.shift_window_ms", visual.shift_window_ms),
            ("visual.shift_kick", f64::from(visual.shift_kick)),
            ("visual.pulse_duration_ms", visual.pulse_duration_ms),
            ("visual.pulse_gain", f64::from(visual.pulse_gain)),
            ("visual.pulse_max_boost", f64::from(visual.pulse_max_boost)),
            ("visual.pulse_end_opacity", f64::from(visual.pulse_end_opacity)),
            ("visual.slide_pulse_gain", f64::from(visual.slide_pulse_gain)),
            ("visual.slide_pulse_max_boost", f64::from(visual.slide_pulse_max_boost)),
            ("visual.slide_pulse_duration_ms", visual.slide_pulse_duration_ms),
            ("visual.rotation_factor", visual.rotation_factor),
        ]
        .into_iter()
        .find(|(_, value)| !value.is_finite())
        .map(|(name, _)| name)
    }
}

/// One playable entry of the recap playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    #[serde(default)]
    pub title: String,
    pub src: String,
}

impl PlaylistEntry {
    pub fn new(title: impl Into<String>, src: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            src: src.into(),
        }
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Analyser frame size. The time-domain frame holds half as many bytes.
    pub frame_size: usize,
    pub initial_volume: f32,
}

impl AudioConfig {
    /// Number of bytes in each time-domain frame.
    pub fn frame_len(&self) -> usize {
        self.frame_size / 2
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            frame_size: 2048,
            initial_volume: 1.0,
        }
    }
}

/// Dispersion measure used to turn a frame into a raw energy value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispersionMeasure {
    #[default]
    Rms,
    MeanAbsoluteDeviation,
}

/// Sensitivity transform applied by the energy extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    pub measure: DispersionMeasure,
    pub scale: f32,
    pub exponent: f32,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            measure: DispersionMeasure::Rms,
            scale: 4.5,
            exponent: 1.12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatConfig {
    /// Normalised energy a frame must exceed to count as a beat.
    pub threshold: f32,
    pub refractory_ms: f64,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            threshold: 0.11,
            refractory_ms: 140.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    pub window_ms: f64,
    pub max_samples: usize,
    /// Mean absolute deviation threshold, in byte units around the 128 centre.
    pub threshold: f32,
    pub debounce_ms: f64,
    pub fallback_bpm: u32,
    /// Range applied to the rotation speed, not to the stored estimate.
    pub min_bpm: f32,
    pub max_bpm: f32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            window_ms: 7_000.0,
            max_samples: 9,
            threshold: 30.0,
            debounce_ms: 180.0,
            fallback_bpm: 90,
            min_bpm: 30.0,
            max_bpm: 220.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    pub shift_window_ms: f64,
    /// How far a beat of strength 1 pushes the shift target.
    pub shift_kick: f32,
    pub pulse_duration_ms: f64,
    pub pulse_gain: f32,
    pub pulse_max_boost: f32,
    pub pulse_end_opacity: f32,
    /// Bump applied to slide decorations, smaller than the ring pulse.
    pub slide_pulse_gain: f32,
    pub slide_pulse_max_boost: f32,
    pub slide_pulse_duration_ms: f64,
    /// Beats per full rotation of the tempo indicator.
    pub rotation_factor: f64,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            shift_window_ms: 350.0,
            shift_kick: 0.6,
            pulse_duration_ms: 260.0,
            pulse_gain: 1.1,
            pulse_max_boost: 0.3,
            pulse_end_opacity: 0.18,
            slide_pulse_gain: 0.12,
            slide_pulse_max_boost: 0.06,
            slide_pulse_duration_ms: 340.0,
            rotation_factor: 8.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_playlist_and_keeps_defaults() {
        let config = AppConfig::from_json_str(
            r#"{
                "playlist": [
                    { "title": "Opening", "src": "audio/opening.wav" },
                    { "src": "audio/untitled.wav" }
                ],
                "beat": { "threshold": 0.2 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.playlist.len(), 2);
        assert_eq!(config.playlist[0].title, "Opening");
        assert_eq!(config.playlist[1].title, "");
        assert_eq!(config.beat.threshold, 0.2);
        assert_eq!(config.beat.refractory_ms, 140.0);
        assert_eq!(config.tempo.fallback_bpm, 90);
        assert_eq!(config.energy.measure, DispersionMeasure::Rms);
    }

    #[test]
    fn parses_dispersion_measure_names() {
        let config =
            AppConfig::from_json_str(r#"{ "energy": { "measure": "mean_absolute_deviation" } }"#)
                .unwrap();
        assert_eq!(
            config.energy.measure,
            DispersionMeasure::MeanAbsoluteDeviation
        );
    }

    #[test]
    fn rejects_non_power_of_two_frames() {
        let err = AppConfig::from_json_str(r#"{ "audio": { "frame_size": 1000 } }"#).unwrap_err();
        assert!(matches!(err, RecapError::InvalidConfig(_)));
        assert!(format!("{err}").contains("1000"));
    }

    #[test]
    fn rejects_non_finite_tunables() {
        let mut config = AppConfig::default();
        config.beat.threshold = f32::NAN;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, RecapError::InvalidConfig(_)));
        assert!(format!("{err}").contains("beat.threshold"));

        let mut config = AppConfig::default();
        config.tempo.threshold = f32::INFINITY;
        assert!(format!("{}", config.validate().unwrap_err()).contains("tempo.threshold"));

        let mut config = AppConfig::default();
        config.visual.rotation_factor = f64::NAN;
        assert!(format!("{}", config.validate().unwrap_err()).contains("visual.rotation_factor"));

        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_malformed_json() {
        let err = AppConfig::from_json_str("{ playlist: ").unwrap_err();
        assert!(matches!(err, RecapError::Json(_)));
    }

    #[test]
    fn frame_len_is_half_the_frame_size() {
        assert_eq!(AudioConfig::default().frame_len(), 1024);
    }
}
