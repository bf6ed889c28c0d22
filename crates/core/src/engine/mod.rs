//! The engine: one owned value holding the player, the analysis chain and the
//! visual driver. Everything happens inside [`AudioEngine::tick`].

use std::fmt;

use serde::Serialize;

use crate::{
    analysis::{AnalysisFrame, BeatDetector, BeatEvent},
    audio::{AudioBackend, ContextState, PlaybackState, Seek},
    config::AppConfig,
    player::PlayerController,
    tempo::{TempoEstimate, TempoSession},
    visual::{Backdrop, TargetId, TargetScope, VisualSync, VisualTarget},
    Result,
};

type BeatObserver = Box<dyn FnMut(&BeatEvent)>;
type ShiftObserver = Box<dyn FnMut(f32)>;
type TempoObserver = Box<dyn FnMut(&TempoEstimate)>;

/// What happened during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameReport {
    pub time_ms: f64,
    pub energy: f32,
    pub beat: Option<BeatEvent>,
    pub shift: f32,
    /// Set on the tick where a tempo pass completed for the current track.
    pub tempo: Option<TempoEstimate>,
}

pub struct AudioEngine<B: AudioBackend> {
    config: AppConfig,
    player: PlayerController<B>,
    detector: BeatDetector,
    tempo_session: Option<TempoSession>,
    /// Generation whose tempo pass starts once its track is actually playing.
    pending_pass: Option<u64>,
    tempo: Option<TempoEstimate>,
    visual: VisualSync,
    unlock_armed: bool,
    beat_observers: Vec<BeatObserver>,
    shift_observers: Vec<ShiftObserver>,
    tempo_observers: Vec<TempoObserver>,
    seen_generation: u64,
    last_tick_ms: Option<f64>,
}

impl<B: AudioBackend> AudioEngine<B> {
    /// Validates `config` and builds an idle engine. Nothing is loaded until
    /// the first gesture or an explicit track selection.
    pub fn new(backend: B, config: AppConfig) -> Result<Self> {
        config.validate()?;

        let player = PlayerController::new(backend, config.playlist.clone(), &config.audio);
        let detector = BeatDetector::new(config.energy.clone(), &config.beat);
        let visual = VisualSync::new(
            config.visual.clone(),
            config.tempo.min_bpm,
            config.tempo.max_bpm,
        );

        tracing::info!(tracks = config.playlist.len(), "audio engine ready");

        Ok(Self {
            config,
            player,
            detector,
            tempo_session: None,
            pending_pass: None,
            tempo: None,
            visual,
            unlock_armed: true,
            beat_observers: Vec::new(),
            shift_observers: Vec::new(),
            tempo_observers: Vec::new(),
            seen_generation: 0,
            last_tick_ms: None,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn player(&self) -> &PlayerController<B> {
        &self.player
    }

    pub fn state(&self) -> PlaybackState {
        self.player.state()
    }

    pub fn shift(&self) -> f32 {
        self.visual.shift()
    }

    pub fn backdrop(&self) -> Backdrop {
        self.visual.backdrop()
    }

    /// Latest accepted estimate. Kept across track changes until the new
    /// track's pass completes.
    pub fn tempo(&self) -> Option<TempoEstimate> {
        self.tempo
    }

    pub fn visual(&self) -> &VisualSync {
        &self.visual
    }

    pub fn spectrum(&mut self) -> Option<&[u8]> {
        self.player.spectrum()
    }

    pub fn on_beat(&mut self, observer: impl FnMut(&BeatEvent) + 'static) {
        self.beat_observers.push(Box::new(observer));
    }

    pub fn on_shift(&mut self, observer: impl FnMut(f32) + 'static) {
        self.shift_observers.push(Box::new(observer));
    }

    pub fn on_tempo(&mut self, observer: impl FnMut(&TempoEstimate) + 'static) {
        self.tempo_observers.push(Box::new(observer));
    }

    pub fn register_target(
        &mut self,
        scope: TargetScope,
        target: impl VisualTarget + 'static,
    ) -> TargetId {
        self.visual.register_target(scope, Box::new(target))
    }

    pub fn deregister_target(&mut self, id: TargetId) -> bool {
        self.visual.deregister_target(id).is_some()
    }

    pub fn set_current_slide(&mut self, slide: usize) {
        self.visual.set_current_slide(slide);
    }

    /// Unlocks audio on the first user gesture.
    ///
    /// Resumes a suspended context and disarms, so later gestures are no-ops.
    /// A failed resume stays armed for the next gesture. Also prepares the
    /// current playlist entry, without playing it, if nothing is loaded yet.
    /// Returns `true` when this call resumed the context.
    pub fn on_user_gesture(&mut self) -> bool {
        if !self.unlock_armed {
            return false;
        }

        let resumed = match self.player.backend().context_state() {
            ContextState::Suspended => match self.player.backend_mut().resume() {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(%err, "audio unlock failed");
                    return false;
                }
            },
            ContextState::Running | ContextState::Unavailable => false,
        };
        self.unlock_armed = false;
        tracing::debug!(resumed, "audio unlocked");

        if let Err(err) = self.player.prepare() {
            tracing::warn!(%err, "first track could not be prepared");
        }
        self.sync_generation();
        resumed
    }

    pub fn load_track(&mut self, locator: &str) -> Result<()> {
        let result = self.player.load_track(locator);
        self.sync_generation();
        result
    }

    pub fn select(&mut self, index: isize, autoplay: bool) -> Result<()> {
        let result = self.player.select(index, autoplay);
        self.sync_generation();
        result
    }

    pub fn next(&mut self) -> Result<()> {
        let result = self.player.next();
        self.sync_generation();
        result
    }

    pub fn previous(&mut self) -> Result<()> {
        let result = self.player.previous();
        self.sync_generation();
        result
    }

    pub fn play(&mut self) -> Result<()> {
        let result = self.player.play();
        self.sync_generation();
        result
    }

    pub fn pause(&mut self) {
        self.player.pause();
    }

    pub fn toggle(&mut self) -> Result<PlaybackState> {
        let result = self.player.toggle();
        self.sync_generation();
        result
    }

    pub fn seek(&mut self, target: Seek) -> bool {
        self.player.seek(target)
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.player.set_volume(volume);
    }

    /// Runs one frame: advances playback, samples the tap, detects beats,
    /// feeds the tempo pass and eases the shift value.
    pub fn tick(&mut self, now_ms: f64) -> FrameReport {
        let elapsed_ms = self
            .last_tick_ms
            .map_or(0.0, |last| (now_ms - last).max(0.0));
        self.last_tick_ms = Some(now_ms);

        if let Err(err) = self.player.advance(elapsed_ms / 1_000.0) {
            tracing::warn!(%err, "could not continue with the next track");
        }
        self.sync_generation();
        self.arm_tempo_pass();

        let frame = self.player.sample_frame();
        let analysis = match frame {
            Some(frame) => self.detector.process(frame, now_ms),
            None => AnalysisFrame {
                time_ms: now_ms,
                ..AnalysisFrame::default()
            },
        };
        let completed = self.tempo_session.as_mut().and_then(|pass| {
            pass.sample(frame, now_ms)
                .map(|estimate| (pass.generation(), estimate))
        });

        if let Some(beat) = analysis.beat {
            self.dispatch_beat(&beat);
        }
        self.visual.publish_energy(analysis.energy, now_ms);

        let tempo = completed.and_then(|(generation, estimate)| {
            self.accept_tempo(generation, estimate).then_some(estimate)
        });

        let shift = self.visual.advance(now_ms);
        for observer in &mut self.shift_observers {
            observer(shift);
        }

        FrameReport {
            time_ms: now_ms,
            energy: analysis.energy,
            beat: analysis.beat,
            shift,
            tempo,
        }
    }

    /// Pauses playback and releases the tap.
    pub fn shutdown(mut self) {
        self.player.teardown();
        tracing::info!("audio engine stopped");
    }

    fn dispatch_beat(&mut self, beat: &BeatEvent) {
        let pulsed = self.visual.pulse(beat);
        tracing::debug!(at = beat.timestamp_ms, strength = beat.strength, pulsed, "beat");
        for observer in &mut self.beat_observers {
            observer(beat);
        }
    }

    /// Publishes an estimate only if it belongs to the track that is loaded now.
    fn accept_tempo(&mut self, generation: u64, estimate: TempoEstimate) -> bool {
        if generation != self.player.generation() {
            tracing::debug!(
                generation,
                current = self.player.generation(),
                "discarding tempo estimate from a replaced track"
            );
            return false;
        }

        self.tempo_session = None;
        self.visual.apply_tempo(&estimate);
        self.tempo = Some(estimate);
        tracing::info!(
            bpm = estimate.bpm,
            samples = estimate.samples,
            confidence = estimate.confidence,
            fallback = estimate.is_fallback(),
            "tempo estimated"
        );

        for observer in &mut self.tempo_observers {
            observer(&estimate);
        }
        true
    }

    /// Cancels the running tempo pass when the track changed and queues one
    /// for the new track. A failed load queues nothing.
    fn sync_generation(&mut self) {
        let generation = self.player.generation();
        if generation == self.seen_generation {
            return;
        }
        self.seen_generation = generation;

        if let Some(previous) = self.tempo_session.take() {
            if !previous.is_finished() {
                tracing::debug!(generation = previous.generation(), "tempo pass cancelled");
            }
        }
        self.pending_pass = self.player.session().is_some().then_some(generation);
    }

    /// Starts the queued pass on the first frame the track is playing, so
    /// silence before playback never counts toward the estimate.
    fn arm_tempo_pass(&mut self) {
        if self.player.state() != PlaybackState::Playing {
            return;
        }
        let Some(generation) = self.pending_pass.take() else {
            return;
        };
        if generation != self.player.generation() {
            return;
        }

        tracing::debug!(generation, "tempo pass started");
        self.tempo_session = Some(TempoSession::new(self.config.tempo.clone(), generation));
    }
}

impl<B: AudioBackend> fmt::Debug for AudioEngine<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioEngine")
            .field("player", &self.player)
            .field("tempo", &self.tempo)
            .field("visual", &self.visual)
            .field("unlock_armed", &self.unlock_armed)
            .finish()
    }
}
