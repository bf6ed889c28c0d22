//! In-memory PCM backend with a software playback clock.
//!
//! Tracks are decoded up front (WAV through [`hound`]) or synthesised, and the
//! play head moves only when the frame loop calls [`AudioSource::advance`].
//! This keeps headless runs and tests deterministic.

use std::{cell::Cell, collections::HashMap, fmt, path::Path, rc::Rc};

use super::{AudioBackend, AudioSource, ContextState};
use crate::{RecapError, Result};

/// Decoded mono samples in `[-1, 1]`.
#[derive(Clone)]
pub struct PcmTrack {
    samples: Rc<[f32]>,
    sample_rate: u32,
    duration_known: bool,
}

impl PcmTrack {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate: sample_rate.max(1),
            duration_known: true,
        }
    }

    pub fn silence(seconds: f64, sample_rate: u32) -> Self {
        let len = (seconds.max(0.0) * sample_rate as f64) as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    /// A source whose metadata never arrives, like a live stream.
    pub fn streaming(sample_rate: u32) -> Self {
        Self {
            duration_known: false,
            ..Self::new(Vec::new(), sample_rate)
        }
    }

    /// Synthetic click track: a short full-scale burst on every beat.
    pub fn click_track(bpm: f64, seconds: f64, sample_rate: u32) -> Self {
        let len = (seconds.max(0.0) * sample_rate as f64) as usize;
        let beat_len = ((60.0 / bpm.max(1.0)) * sample_rate as f64) as usize;
        let burst_len = (0.06 * sample_rate as f64) as usize;

        let samples = (0..len)
            .map(|index| {
                if beat_len > 0 && index % beat_len < burst_len {
                    if index % 2 == 0 {
                        0.9
                    } else {
                        -0.9
                    }
                } else {
                    0.0
                }
            })
            .collect();

        Self::new(samples, sample_rate)
    }

    /// Decodes a WAV file and mixes it down to mono.
    pub fn from_wav(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let locator = path.display().to_string();

        let mut reader =
            hound::WavReader::open(path).map_err(|err| RecapError::source_load(&locator, err))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>(),
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1_i64 << spec.bits_per_sample.saturating_sub(1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 * scale))
                    .collect()
            }
        }
        .map_err(|err| RecapError::source_load(&locator, err))?;

        let samples = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        Ok(Self::new(samples, spec.sample_rate))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration_known
            .then(|| self.samples.len() as f64 / self.sample_rate as f64)
    }
}

impl fmt::Debug for PcmTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcmTrack")
            .field("samples", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("duration_known", &self.duration_known)
            .finish()
    }
}

/// Backend that serves registered in-memory tracks and falls back to reading
/// WAV files from disk.
#[derive(Debug)]
pub struct PcmBackend {
    context: Rc<Cell<ContextState>>,
    tracks: HashMap<String, PcmTrack>,
}

impl PcmBackend {
    /// Starts suspended: nothing plays before the first user gesture.
    pub fn new() -> Self {
        Self::with_context(ContextState::Suspended)
    }

    pub fn running() -> Self {
        Self::with_context(ContextState::Running)
    }

    /// A backend whose analysis context cannot be created.
    pub fn unavailable() -> Self {
        Self::with_context(ContextState::Unavailable)
    }

    fn with_context(state: ContextState) -> Self {
        Self {
            context: Rc::new(Cell::new(state)),
            tracks: HashMap::new(),
        }
    }

    pub fn insert_track(&mut self, locator: impl Into<String>, track: PcmTrack) {
        self.tracks.insert(locator.into(), track);
    }
}

impl Default for PcmBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for PcmBackend {
    type Source = PcmSource;

    fn open(&mut self, locator: &str) -> Result<PcmSource> {
        let track = match self.tracks.get(locator) {
            Some(track) => track.clone(),
            None => PcmTrack::from_wav(locator)?,
        };

        Ok(PcmSource::new(track, self.context.clone()))
    }

    fn context_state(&self) -> ContextState {
        self.context.get()
    }

    fn resume(&mut self) -> Result<()> {
        match self.context.get() {
            ContextState::Unavailable => Err(RecapError::ResourceUnavailable(
                "no audio processing context".into(),
            )),
            _ => {
                self.context.set(ContextState::Running);
                Ok(())
            }
        }
    }
}

/// A [`PcmTrack`] being played back on the frame clock.
pub struct PcmSource {
    track: PcmTrack,
    context: Rc<Cell<ContextState>>,
    position: f64,
    volume: f32,
    paused: bool,
    ended: bool,
    tapped: bool,
}

impl PcmSource {
    fn new(track: PcmTrack, context: Rc<Cell<ContextState>>) -> Self {
        Self {
            track,
            context,
            position: 0.0,
            volume: 1.0,
            paused: true,
            ended: false,
            tapped: false,
        }
    }

    /// A standalone source on a context that is already running.
    pub fn unlocked(track: PcmTrack) -> Self {
        Self::new(track, Rc::new(Cell::new(ContextState::Running)))
    }

    pub fn is_tapped(&self) -> bool {
        self.tapped
    }

    pub fn track(&self) -> &PcmTrack {
        &self.track
    }

    fn end_seconds(&self) -> f64 {
        self.track.len() as f64 / self.track.sample_rate as f64
    }
}

impl AudioSource for PcmSource {
    fn play(&mut self) -> Result<()> {
        if self.context.get() == ContextState::Suspended {
            return Err(RecapError::PlaybackRejected(
                "audio context is suspended until a user gesture".into(),
            ));
        }

        if self.ended {
            self.position = 0.0;
            self.ended = false;
        }
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn duration(&self) -> Option<f64> {
        self.track.duration()
    }

    fn position(&self) -> f64 {
        self.position
    }

    fn set_position(&mut self, seconds: f64) {
        let end = self.end_seconds();
        self.position = seconds.clamp(0.0, end);
        self.ended = self.track.duration_known && self.position >= end && end > 0.0;
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn has_ended(&self) -> bool {
        self.ended
    }

    fn connect_tap(&mut self) -> Result<()> {
        if self.context.get() == ContextState::Unavailable {
            return Err(RecapError::ResourceUnavailable(
                "cannot create an analyser without a processing context".into(),
            ));
        }
        if self.tapped {
            return Err(RecapError::msg("source already feeds an analysis tap"));
        }
        self.tapped = true;
        Ok(())
    }

    fn disconnect_tap(&mut self) {
        self.tapped = false;
    }

    fn read_time_domain(&self, out: &mut [u8]) {
        if self.paused {
            out.fill(128);
            return;
        }

        let end = ((self.position * self.track.sample_rate as f64) as usize).min(self.track.len());
        let start = end.saturating_sub(out.len());
        let pad = out.len() - (end - start);

        out[..pad].fill(128);
        for (byte, sample) in out[pad..].iter_mut().zip(&self.track.samples[start..end]) {
            *byte = (128.0 * (1.0 + sample.clamp(-1.0, 1.0))).round().clamp(0.0, 255.0) as u8;
        }
    }

    fn advance(&mut self, elapsed_seconds: f64) {
        if self.paused || elapsed_seconds <= 0.0 {
            return;
        }

        self.position += elapsed_seconds;
        if self.track.duration_known {
            let end = self.end_seconds();
            if self.position >= end {
                self.position = end;
                self.ended = true;
                self.paused = true;
            }
        }
    }
}

impl fmt::Debug for PcmSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcmSource")
            .field("track", &self.track)
            .field("position", &self.position)
            .field("paused", &self.paused)
            .field("tapped", &self.tapped)
            .finish()
    }
}
