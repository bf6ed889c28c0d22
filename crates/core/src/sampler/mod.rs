use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{
    audio::{AudioSession, AudioSource, SessionId},
    Result,
};

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Live connection from one [`AudioSession`] into the analysis buffers.
///
/// A tap is bound to the session it was connected to and never yields frames
/// for any other session.
pub struct AnalysisTap {
    session: SessionId,
    time_domain: Box<[u8]>,
    frequency: Box<[u8]>,
    fft: FftResources,
}

impl AnalysisTap {
    fn connect<S: AudioSource>(
        session: &mut AudioSession<S>,
        frame_len: usize,
        planner: &mut RealFftPlanner<f32>,
    ) -> Result<Self> {
        session.source_mut().connect_tap()?;

        Ok(Self {
            session: session.id(),
            time_domain: vec![128; frame_len].into_boxed_slice(),
            frequency: vec![0; frame_len / 2].into_boxed_slice(),
            fft: FftResources::new(planner, frame_len),
        })
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn frame_len(&self) -> usize {
        self.time_domain.len()
    }

    /// Most recently acquired time-domain frame.
    pub fn time_domain(&self) -> &[u8] {
        &self.time_domain
    }

    fn refresh<S: AudioSource>(&mut self, session: &AudioSession<S>) -> &[u8] {
        session.source().read_time_domain(&mut self.time_domain);
        &self.time_domain
    }

    /// Byte-scaled magnitude spectrum of the current time-domain frame.
    fn frequency_frame(&mut self) -> Result<&[u8]> {
        let len = self.time_domain.len();
        for (index, (input, byte)) in self
            .fft
            .input
            .iter_mut()
            .zip(self.time_domain.iter())
            .enumerate()
        {
            *input = (*byte as f32 - 128.0) / 128.0 * hann_value(index, len);
        }

        self.fft
            .plan
            .process_with_scratch(&mut self.fft.input, &mut self.fft.spectrum, &mut self.fft.scratch)
            .map_err(|err| crate::RecapError::msg(format!("spectrum transform failed: {err}")))?;

        let range = MAX_DECIBELS - MIN_DECIBELS;
        for (byte, bin) in self.frequency.iter_mut().zip(self.fft.spectrum.iter()) {
            let magnitude = bin.norm() / len as f32;
            let decibels = 20.0 * magnitude.max(f32::MIN_POSITIVE).log10();
            *byte = (255.0 * (decibels - MIN_DECIBELS) / range).clamp(0.0, 255.0) as u8;
        }

        Ok(&self.frequency)
    }
}

impl fmt::Debug for AnalysisTap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisTap")
            .field("session", &self.session)
            .field("frame_len", &self.time_domain.len())
            .finish()
    }
}

/// Owns the single [`AnalysisTap`] and enforces detach-before-attach.
pub struct SignalSampler {
    frame_len: usize,
    tap: Option<AnalysisTap>,
    planner: RealFftPlanner<f32>,
}

impl SignalSampler {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len: frame_len.max(2),
            tap: None,
            planner: RealFftPlanner::new(),
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn tap(&self) -> Option<&AnalysisTap> {
        self.tap.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.tap.is_some()
    }

    /// Connects a fresh tap to `session`. Any previous tap is dropped first;
    /// callers detach it from its own session beforehand.
    pub fn attach<S: AudioSource>(&mut self, session: &mut AudioSession<S>) -> Result<()> {
        if let Some(stale) = self.tap.take() {
            tracing::warn!(session = %stale.session(), "dropping tap that was never detached");
        }

        let tap = AnalysisTap::connect(session, self.frame_len, &mut self.planner)?;
        tracing::debug!(session = %session.id(), frame_len = self.frame_len, "analysis tap attached");
        self.tap = Some(tap);
        Ok(())
    }

    /// Disconnects the tap from `session` if it belongs to it.
    pub fn detach<S: AudioSource>(&mut self, session: &mut AudioSession<S>) {
        match self.tap.take() {
            Some(tap) if tap.session() == session.id() => {
                session.source_mut().disconnect_tap();
                tracing::debug!(session = %session.id(), "analysis tap detached");
            }
            Some(tap) => {
                tracing::warn!(
                    tap = %tap.session(),
                    session = %session.id(),
                    "discarding tap bound to another session"
                );
            }
            None => {}
        }
    }

    /// Reads the latest frame of `session`. Returns `None` when no tap is
    /// attached or the tap belongs to a session that has been replaced.
    pub fn acquire<S: AudioSource>(&mut self, session: &AudioSession<S>) -> Option<&[u8]> {
        if self
            .tap
            .as_ref()
            .is_some_and(|tap| tap.session() != session.id())
        {
            tracing::warn!(session = %session.id(), "refusing frames from a stale tap");
            self.tap = None;
        }

        self.tap.as_mut().map(|tap| tap.refresh(session))
    }

    /// Spectrum of the last acquired frame, for bar-style renderers.
    pub fn spectrum(&mut self) -> Option<&[u8]> {
        let tap = self.tap.as_mut()?;
        match tap.frequency_frame() {
            Ok(bins) => Some(bins),
            Err(err) => {
                tracing::warn!(%err, "spectrum unavailable");
                None
            }
        }
    }
}

impl fmt::Debug for SignalSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalSampler")
            .field("frame_len", &self.frame_len)
            .field("tap", &self.tap)
            .finish()
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl FftResources {
    fn new(planner: &mut RealFftPlanner<f32>, size: usize) -> Self {
        let plan = planner.plan_fft_forward(size);
        let scratch = plan.make_scratch_vec();
        let spectrum = plan.make_output_vec();
        let input = plan.make_input_vec();
        Self {
            plan,
            scratch,
            spectrum,
            input,
        }
    }
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{PcmSource, PcmTrack};

    fn session(id: u64, track: PcmTrack) -> AudioSession<PcmSource> {
        AudioSession::new(SessionId(id), "test", PcmSource::unlocked(track))
    }

    #[test]
    fn attach_connects_the_source() {
        let mut sampler = SignalSampler::new(64);
        let mut session = session(1, PcmTrack::silence(1.0, 1000));

        sampler.attach(&mut session).unwrap();
        assert!(session.source().is_tapped());
        assert_eq!(sampler.tap().unwrap().frame_len(), 64);

        sampler.detach(&mut session);
        assert!(!session.source().is_tapped());
        assert!(!sampler.is_attached());
    }

    #[test]
    fn stale_tap_yields_no_frames() {
        let mut sampler = SignalSampler::new(64);
        let mut first = session(1, PcmTrack::silence(1.0, 1000));
        let second = session(2, PcmTrack::silence(1.0, 1000));

        sampler.attach(&mut first).unwrap();
        assert!(sampler.acquire(&first).is_some());
        assert!(sampler.acquire(&second).is_none());
        assert!(!sampler.is_attached());
    }

    #[test]
    fn acquire_reads_the_latest_frame() {
        let mut sampler = SignalSampler::new(8);
        let mut session = session(1, PcmTrack::new(vec![0.5; 100], 100));
        sampler.attach(&mut session).unwrap();
        session.play().unwrap();
        session.source_mut().advance(0.5);

        let frame = sampler.acquire(&session).unwrap();
        assert_eq!(frame, &[192; 8]);
        // The tap keeps the frame for waveform renderers until the next read.
        assert_eq!(sampler.tap().unwrap().time_domain(), &[192; 8]);
    }

    #[test]
    fn spectrum_of_silence_is_floor() {
        let mut sampler = SignalSampler::new(64);
        let mut session = session(1, PcmTrack::silence(1.0, 1000));
        sampler.attach(&mut session).unwrap();
        sampler.acquire(&session).unwrap();

        let bins = sampler.spectrum().unwrap();
        assert_eq!(bins.len(), 32);
        assert!(bins.iter().all(|&bin| bin == 0));
    }

    #[test]
    fn spectrum_peaks_at_the_tone_frequency() {
        let rate = 1024;
        let samples: Vec<f32> = (0..rate)
            .map(|i| (2.0 * PI * 128.0 * i as f32 / rate as f32).sin() * 0.05)
            .collect();
        let mut sampler = SignalSampler::new(256);
        let mut session = session(1, PcmTrack::new(samples, rate));
        sampler.attach(&mut session).unwrap();
        session.play().unwrap();
        session.source_mut().advance(0.5);
        sampler.acquire(&session).unwrap();

        let bins = sampler.spectrum().unwrap();
        let peak = bins
            .iter()
            .enumerate()
            .max_by_key(|&(_, &value)| value)
            .map(|(index, _)| index)
            .unwrap();
        // 128 Hz at 1024 Hz over 256 samples lands in bin 32.
        assert_eq!(peak, 32);
    }
}
