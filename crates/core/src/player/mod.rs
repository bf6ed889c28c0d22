use std::fmt;

use crate::{
    audio::{AudioBackend, AudioSession, AudioSource, ContextState, PlaybackState, Seek, SessionId},
    config::{AudioConfig, PlaylistEntry},
    sampler::SignalSampler,
    RecapError, Result,
};

/// Owns the single [`AudioSession`] and the sampler tapping it.
///
/// Every track change tears the session down, detaches its tap, opens the new
/// source and attaches a fresh tap. The generation counter increases on every
/// change so dependants can tell which track their work belongs to.
pub struct PlayerController<B: AudioBackend> {
    backend: B,
    playlist: Vec<PlaylistEntry>,
    index: usize,
    session: Option<AudioSession<B::Source>>,
    sampler: SignalSampler,
    volume: f32,
    generation: u64,
    next_session: u64,
}

impl<B: AudioBackend> PlayerController<B> {
    pub fn new(backend: B, playlist: Vec<PlaylistEntry>, config: &AudioConfig) -> Self {
        Self {
            backend,
            playlist,
            index: 0,
            session: None,
            sampler: SignalSampler::new(config.frame_len()),
            volume: config.initial_volume.clamp(0.0, 1.0),
            generation: 0,
            next_session: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn playlist(&self) -> &[PlaylistEntry] {
        &self.playlist
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current_entry(&self) -> Option<&PlaylistEntry> {
        self.playlist.get(self.index)
    }

    pub fn session(&self) -> Option<&AudioSession<B::Source>> {
        self.session.as_ref()
    }

    pub fn sampler(&self) -> &SignalSampler {
        &self.sampler
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Actual state of the underlying source; `Stopped` when nothing is loaded.
    pub fn state(&self) -> PlaybackState {
        self.session
            .as_ref()
            .map(AudioSession::state)
            .unwrap_or(PlaybackState::Stopped)
    }

    /// Replaces the current session with one for `locator`.
    ///
    /// A load failure leaves the player idle with no session; navigation keeps
    /// working. A missing analysis context only disables the tap.
    pub fn load_track(&mut self, locator: &str) -> Result<()> {
        self.teardown();
        self.generation += 1;

        let source = match self.backend.open(locator) {
            Ok(source) => source,
            Err(err) => {
                tracing::warn!(locator, %err, "track failed to load");
                return Err(err);
            }
        };

        let id = SessionId(self.next_session);
        self.next_session += 1;

        let mut session = AudioSession::new(id, locator, source);
        session.set_volume(self.volume);

        if let Err(err) = self.sampler.attach(&mut session) {
            tracing::warn!(%err, "audio analysis not available");
        }

        tracing::info!(locator, %id, generation = self.generation, "track loaded");
        self.session = Some(session);
        Ok(())
    }

    /// Selects a playlist entry, wrapping the index in both directions.
    pub fn select(&mut self, index: isize, autoplay: bool) -> Result<()> {
        if self.playlist.is_empty() {
            return Err(RecapError::msg("playlist is empty"));
        }

        self.index = index.rem_euclid(self.playlist.len() as isize) as usize;
        let locator = self.playlist[self.index].src.clone();
        self.load_track(&locator)?;

        if autoplay {
            self.play()?;
        }
        Ok(())
    }

    pub fn next(&mut self) -> Result<()> {
        self.select(self.index as isize + 1, true)
    }

    pub fn previous(&mut self) -> Result<()> {
        self.select(self.index as isize - 1, true)
    }

    /// Loads the current entry without starting playback, if nothing is loaded.
    pub fn prepare(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let Some(entry) = self.current_entry() else {
            return Ok(());
        };
        let locator = entry.src.clone();
        self.load_track(&locator)
    }

    /// Starts playback, loading the current entry first if needed and
    /// resuming a suspended context.
    pub fn play(&mut self) -> Result<()> {
        if self.session.is_none() {
            let Some(entry) = self.current_entry() else {
                return Err(RecapError::msg("nothing to play"));
            };
            let locator = entry.src.clone();
            self.load_track(&locator)?;
        }

        if self.backend.context_state() == ContextState::Suspended {
            if let Err(err) = self.backend.resume() {
                tracing::warn!(%err, "audio context could not be resumed");
            }
        }

        let Some(session) = self.session.as_mut() else {
            return Err(RecapError::msg("nothing to play"));
        };
        session.set_volume(self.volume);
        if let Err(err) = session.play() {
            tracing::warn!(%err, "playback did not start");
            return Err(err);
        }
        Ok(())
    }

    pub fn pause(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.pause();
        }
    }

    /// Two-state play/pause toggle. Returns the resulting state.
    pub fn toggle(&mut self) -> Result<PlaybackState> {
        if self.state() == PlaybackState::Playing {
            self.pause();
        } else {
            self.play()?;
        }
        Ok(self.state())
    }

    pub fn seek(&mut self, target: Seek) -> bool {
        self.session
            .as_mut()
            .is_some_and(|session| session.seek(target))
    }

    /// Applies immediately and carries over to future sessions.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            self.volume
        };
        if let Some(session) = self.session.as_mut() {
            session.set_volume(self.volume);
        }
    }

    /// Moves the play head by one frame. On natural end the next entry is
    /// loaded and played. Returns `true` when the track changed.
    pub fn advance(&mut self, elapsed_seconds: f64) -> Result<bool> {
        let Some(session) = self.session.as_mut() else {
            return Ok(false);
        };

        session.source_mut().advance(elapsed_seconds);
        if !session.sync() {
            return Ok(false);
        }

        tracing::info!(locator = session.locator(), "track ended");
        if self.playlist.is_empty() {
            return Ok(false);
        }
        self.next().map(|()| true).or_else(|err| match err {
            RecapError::PlaybackRejected(_) => Ok(true),
            err => Err(err),
        })
    }

    /// Latest time-domain frame of the current session.
    pub fn sample_frame(&mut self) -> Option<&[u8]> {
        let session = self.session.as_ref()?;
        self.sampler.acquire(session)
    }

    pub fn spectrum(&mut self) -> Option<&[u8]> {
        self.session.as_ref()?;
        self.sampler.spectrum()
    }

    /// Pauses the current session and releases its tap.
    pub fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.pause();
            self.sampler.detach(&mut session);
            tracing::debug!(session = %session.id(), "session torn down");
        }
    }
}

impl<B: AudioBackend> fmt::Debug for PlayerController<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerController")
            .field("index", &self.index)
            .field("tracks", &self.playlist.len())
            .field("session", &self.session)
            .field("volume", &self.volume)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{PcmBackend, PcmTrack};

    fn playlist(len: usize) -> Vec<PlaylistEntry> {
        (0..len)
            .map(|i| PlaylistEntry::new(format!("Track {i}"), format!("track-{i}")))
            .collect()
    }

    fn player(len: usize, seconds: f64) -> PlayerController<PcmBackend> {
        let mut backend = PcmBackend::running();
        for entry in playlist(len) {
            backend.insert_track(entry.src, PcmTrack::silence(seconds, 1000));
        }
        PlayerController::new(backend, playlist(len), &AudioConfig::default())
    }

    #[test]
    fn next_wraps_to_first_and_previous_to_last() {
        let mut player = player(3, 5.0);
        player.select(2, false).unwrap();
        player.next().unwrap();
        assert_eq!(player.index(), 0);

        player.previous().unwrap();
        assert_eq!(player.index(), 2);
        assert_eq!(player.current_entry().unwrap().title, "Track 2");
    }

    #[test]
    fn every_track_change_leaves_exactly_one_tap() {
        let mut player = player(3, 5.0);
        for step in 0..7 {
            match step % 3 {
                0 => player.next().unwrap(),
                1 => player.previous().unwrap(),
                _ => player.select(step, true).unwrap(),
            }
            let session = player.session().unwrap();
            let tap = player.sampler().tap().unwrap();
            assert_eq!(tap.session(), session.id());
            assert!(session.source().is_tapped());
        }
        assert_eq!(player.generation(), 7);
    }

    #[test]
    fn volume_set_while_paused_survives_play() {
        let mut player = player(1, 5.0);
        player.select(0, true).unwrap();
        player.pause();
        player.set_volume(0.3);
        player.play().unwrap();
        assert_eq!(player.session().unwrap().volume(), 0.3);
        assert_eq!(player.state(), PlaybackState::Playing);
    }

    #[test]
    fn volume_set_before_loading_applies_to_the_new_session() {
        let mut player = player(2, 5.0);
        player.set_volume(0.3);
        player.play().unwrap();
        assert_eq!(player.session().unwrap().volume(), 0.3);
        player.set_volume(7.0);
        assert_eq!(player.volume(), 1.0);
    }

    #[test]
    fn seek_needs_a_loaded_session() {
        let mut player = player(1, 200.0);
        assert!(!player.seek(Seek::Ratio(0.5)));
        player.select(0, false).unwrap();
        assert!(player.seek(Seek::Ratio(0.5)));
        assert_eq!(player.session().unwrap().position(), 100.0);
    }

    #[test]
    fn end_of_track_advances_with_autoplay() {
        let mut player = player(2, 1.0);
        player.select(1, true).unwrap();

        assert!(!player.advance(0.5).unwrap());
        assert!(player.advance(0.6).unwrap());
        assert_eq!(player.index(), 0);
        assert_eq!(player.state(), PlaybackState::Playing);
    }

    #[test]
    fn load_failure_leaves_player_idle_and_navigable() {
        let mut backend = PcmBackend::running();
        backend.insert_track("track-1", PcmTrack::silence(1.0, 1000));
        let mut player = PlayerController::new(backend, playlist(2), &AudioConfig::default());

        assert!(matches!(
            player.select(0, true),
            Err(RecapError::SourceLoad { .. })
        ));
        assert!(player.session().is_none());
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert!(!player.sampler().is_attached());

        player.next().unwrap();
        assert_eq!(player.index(), 1);
        assert_eq!(player.state(), PlaybackState::Playing);
    }

    #[test]
    fn missing_analysis_context_keeps_playback() {
        let mut backend = PcmBackend::unavailable();
        backend.insert_track("track-0", PcmTrack::silence(1.0, 1000));
        let mut player = PlayerController::new(backend, playlist(1), &AudioConfig::default());

        // Playback works without an analysis context, only the tap is missing.
        player.select(0, true).unwrap();
        assert_eq!(player.state(), PlaybackState::Playing);
        assert!(!player.sampler().is_attached());
        assert!(player.sample_frame().is_none());
    }

    #[test]
    fn toggle_switches_between_playing_and_paused() {
        let mut player = player(1, 5.0);
        assert_eq!(player.toggle().unwrap(), PlaybackState::Playing);
        assert_eq!(player.toggle().unwrap(), PlaybackState::Paused);
        assert_eq!(player.toggle().unwrap(), PlaybackState::Playing);
    }
}
