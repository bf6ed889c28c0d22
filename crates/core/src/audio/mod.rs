//! Playable audio sources and the session wrapper the player owns.
//!
//! The platform layer (a browser media element, a native output stream, the
//! in-memory [`pcm`] backend) implements [`AudioBackend`] and [`AudioSource`].
//! Everything above this module only talks to those traits.

pub mod pcm;

use std::fmt;

use crate::Result;

pub use pcm::{PcmBackend, PcmSource, PcmTrack};

/// Playback state as reported to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// State of the shared audio processing context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Waiting for a user gesture before sound may play.
    Suspended,
    Running,
    /// The context could not be created at all. Playback may still work but
    /// analysis taps cannot be connected.
    Unavailable,
}

/// Platform audio layer: opens sources and owns the processing context.
pub trait AudioBackend {
    type Source: AudioSource;

    /// Opens the source behind `locator`. Failures map to
    /// [`RecapError::SourceLoad`](crate::RecapError::SourceLoad).
    fn open(&mut self, locator: &str) -> Result<Self::Source>;

    fn context_state(&self) -> ContextState;

    /// Resumes a suspended context. Calling it on a running context is a no-op.
    fn resume(&mut self) -> Result<()>;
}

/// A single playable, seekable track.
pub trait AudioSource {
    /// Starts or resumes playback. May be rejected by the platform.
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self);

    fn is_paused(&self) -> bool;

    /// Total length in seconds, `None` until the metadata is known.
    fn duration(&self) -> Option<f64>;

    fn position(&self) -> f64;

    fn set_position(&mut self, seconds: f64);

    fn volume(&self) -> f32;

    fn set_volume(&mut self, volume: f32);

    /// Whether playback reached the natural end of the track.
    fn has_ended(&self) -> bool;

    /// Routes the source into an analysis unit.
    fn connect_tap(&mut self) -> Result<()>;

    fn disconnect_tap(&mut self);

    /// Fills `out` with the most recent time-domain samples as unsigned bytes
    /// (128 = centre). Never blocks.
    fn read_time_domain(&self, out: &mut [u8]);

    /// Called once per frame with the elapsed wall time. Sources that play on
    /// their own clock ignore it; software-clocked sources advance here.
    fn advance(&mut self, _elapsed_seconds: f64) {}
}

/// Unique id of one loaded track. Every track change mints a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Seek target accepted by [`AudioSession::seek`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Seek {
    /// Fraction of the duration, clamped to `[0, 1]`.
    Ratio(f64),
    /// Absolute position, clamped to the duration.
    Seconds(f64),
}

/// The currently loaded track together with its playback state.
pub struct AudioSession<S: AudioSource> {
    id: SessionId,
    locator: String,
    source: S,
    state: PlaybackState,
}

impl<S: AudioSource> AudioSession<S> {
    pub(crate) fn new(id: SessionId, locator: impl Into<String>, source: S) -> Self {
        Self {
            id,
            locator: locator.into(),
            source,
            state: PlaybackState::Stopped,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn duration(&self) -> Option<f64> {
        self.source
            .duration()
            .filter(|duration| duration.is_finite() && *duration > 0.0)
    }

    pub fn position(&self) -> f64 {
        self.source.position()
    }

    pub fn volume(&self) -> f32 {
        self.source.volume()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Starts playback. A rejected start leaves the session paused so the
    /// reported state never claims "playing" for a silent source.
    pub fn play(&mut self) -> Result<()> {
        match self.source.play() {
            Ok(()) => {
                self.state = PlaybackState::Playing;
                Ok(())
            }
            Err(err) => {
                self.source.pause();
                self.state = PlaybackState::Paused;
                Err(err)
            }
        }
    }

    pub fn pause(&mut self) {
        self.source.pause();
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    /// Moves the play head. Returns `false` without touching the source when
    /// the duration is unknown.
    pub fn seek(&mut self, target: Seek) -> bool {
        let Some(duration) = self.duration() else {
            return false;
        };

        let position = match target {
            Seek::Ratio(ratio) if ratio.is_finite() => ratio.clamp(0.0, 1.0) * duration,
            Seek::Seconds(seconds) if seconds.is_finite() => seconds.clamp(0.0, duration),
            _ => return false,
        };

        self.source.set_position(position);
        true
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.source.set_volume(volume);
    }

    /// Reconciles the reported state with the source after it advanced.
    /// Returns `true` when the track just reached its end.
    pub(crate) fn sync(&mut self) -> bool {
        if self.state != PlaybackState::Playing {
            return false;
        }

        if self.source.has_ended() {
            self.state = PlaybackState::Stopped;
            return true;
        }

        if self.source.is_paused() {
            self.state = PlaybackState::Paused;
        }
        false
    }
}

impl<S: AudioSource> fmt::Debug for AudioSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSession")
            .field("id", &self.id)
            .field("locator", &self.locator)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(duration: Option<f64>) -> AudioSession<PcmSource> {
        let track = match duration {
            Some(seconds) => PcmTrack::silence(seconds, 100),
            None => PcmTrack::streaming(100),
        };
        AudioSession::new(SessionId(1), "test", PcmSource::unlocked(track))
    }

    #[test]
    fn seek_ratio_maps_onto_duration() {
        let mut session = session(Some(200.0));
        assert!(session.seek(Seek::Ratio(0.5)));
        assert!((session.position() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn seek_is_noop_without_duration() {
        let mut session = session(None);
        assert!(!session.seek(Seek::Ratio(0.5)));
        assert!(!session.seek(Seek::Seconds(12.0)));
        assert_eq!(session.position(), 0.0);
    }

    #[test]
    fn seek_seconds_clamps_to_duration() {
        let mut session = session(Some(10.0));
        assert!(session.seek(Seek::Seconds(25.0)));
        assert_eq!(session.position(), 10.0);
        assert!(session.seek(Seek::Ratio(-3.0)));
        assert_eq!(session.position(), 0.0);
    }

    #[test]
    fn rejected_play_leaves_session_paused() {
        let track = PcmTrack::silence(5.0, 100);
        let mut backend = PcmBackend::new();
        backend.insert_track("locked", track);
        let source = backend.open("locked").unwrap();
        let mut session = AudioSession::new(SessionId(7), "locked", source);

        assert!(session.play().is_err());
        assert_eq!(session.state(), PlaybackState::Paused);
        assert!(session.source().is_paused());
    }

    #[test]
    fn sync_reports_natural_end() {
        let mut session = session(Some(1.0));
        session.play().unwrap();
        session.source_mut().advance(0.5);
        assert!(!session.sync());
        session.source_mut().advance(0.6);
        assert!(session.sync());
        assert_eq!(session.state(), PlaybackState::Stopped);
    }
}
