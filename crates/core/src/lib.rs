//! Core library for the Recap Pulse presentation.
//!
//! Plays a playlist, taps the playing track for raw amplitude frames, turns
//! them into energy, beats and a per-track tempo estimate, and drives
//! beat-synchronised visual effects on targets registered by the renderer.
//! [`AudioEngine`] owns all of it and does its work in one frame tick.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod player;
pub mod sampler;
pub mod tempo;
pub mod timeline;
pub mod visual;

pub use analysis::{AnalysisFrame, BeatDetector, BeatEvent, EnergyExtractor};
pub use audio::{
    AudioBackend, AudioSession, AudioSource, ContextState, PcmBackend, PcmTrack, PlaybackState,
    Seek, SessionId,
};
pub use config::{AppConfig, AudioConfig, PlaylistEntry};
pub use engine::{AudioEngine, FrameReport};
pub use error::{RecapError, Result};
pub use player::PlayerController;
pub use sampler::{AnalysisTap, SignalSampler};
pub use tempo::{TempoEstimate, TempoSession};
pub use timeline::{FixedStepScheduler, FrameScheduler, FrameTime, PacedScheduler, TickControl};
pub use visual::{Animation, Backdrop, TargetId, TargetScope, VisualSync, VisualTarget};
