//! Beat-driven visual effects: the eased shift value, beat pulses and the
//! tempo-locked rotation, applied to targets registered by the rendering layer.

mod animation;
mod shift;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{analysis::BeatEvent, config::VisualConfig, tempo::TempoEstimate};

pub use animation::{Animation, AnimationKind, Easing, Iterations, Transform};
pub use shift::ShiftState;

/// Something on screen that can play keyframe animations.
pub trait VisualTarget {
    fn animate(&mut self, animation: &Animation);
}

impl<F: FnMut(&Animation)> VisualTarget for F {
    fn animate(&mut self, animation: &Animation) {
        self(animation)
    }
}

/// Which effects reach a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetScope {
    /// Always pulsed and rotated, e.g. the beat ring.
    Global,
    /// Pulsed only while the given slide is current.
    Slide(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(u64);

struct RegisteredTarget {
    id: TargetId,
    scope: TargetScope,
    target: Box<dyn VisualTarget>,
}

/// Background styling derived from the shift value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backdrop {
    /// Position of the gradient's first colour stop, in percent.
    pub gradient_mid_percent: u32,
    pub glow_radius_px: u32,
    pub glow_alpha: f32,
}

impl Backdrop {
    pub fn from_shift(shift: f32) -> Self {
        let shift = shift.clamp(0.0, 1.0);
        Self {
            gradient_mid_percent: 10 + (shift * 60.0).round() as u32,
            glow_radius_px: 20 + (shift * 160.0).round() as u32,
            glow_alpha: (shift * 0.5).min(0.12),
        }
    }
}

/// Applies pulses, rotation and shift easing for the lifetime of the engine.
pub struct VisualSync {
    config: VisualConfig,
    min_bpm: f32,
    max_bpm: f32,
    shift: ShiftState,
    targets: Vec<RegisteredTarget>,
    next_target: u64,
    current_slide: usize,
    rotation: Option<Animation>,
}

impl VisualSync {
    pub fn new(config: VisualConfig, min_bpm: f32, max_bpm: f32) -> Self {
        let shift = ShiftState::new(config.shift_window_ms, config.shift_kick);
        Self {
            config,
            min_bpm,
            max_bpm,
            shift,
            targets: Vec::new(),
            next_target: 0,
            current_slide: 0,
            rotation: None,
        }
    }

    pub fn shift(&self) -> f32 {
        self.shift.value()
    }

    pub fn backdrop(&self) -> Backdrop {
        Backdrop::from_shift(self.shift())
    }

    pub fn rotation(&self) -> Option<&Animation> {
        self.rotation.as_ref()
    }

    pub fn current_slide(&self) -> usize {
        self.current_slide
    }

    pub fn set_current_slide(&mut self, slide: usize) {
        self.current_slide = slide;
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Registers a target. Global targets join an active rotation at once.
    pub fn register_target(
        &mut self,
        scope: TargetScope,
        mut target: Box<dyn VisualTarget>,
    ) -> TargetId {
        let id = TargetId(self.next_target);
        self.next_target += 1;

        if let (TargetScope::Global, Some(rotation)) = (scope, self.rotation.as_ref()) {
            target.animate(rotation);
        }

        self.targets.push(RegisteredTarget { id, scope, target });
        id
    }

    /// Removes a target; its running animations are left with the renderer.
    pub fn deregister_target(&mut self, id: TargetId) -> Option<Box<dyn VisualTarget>> {
        let index = self.targets.iter().position(|entry| entry.id == id)?;
        Some(self.targets.remove(index).target)
    }

    /// Pulses every target in scope and kicks the shift value. Global targets
    /// get the ring pulse, current-slide targets the smaller decoration bump.
    /// Returns the number of targets animated.
    pub fn pulse(&mut self, beat: &BeatEvent) -> usize {
        self.shift.kick(beat.strength, beat.timestamp_ms);

        let ring = Animation::pulse(beat.strength, &self.config);
        let decoration = Animation::slide_pulse(beat.strength, &self.config);
        let slide = self.current_slide;
        let mut pulsed = 0;
        for entry in &mut self.targets {
            let animation = match entry.scope {
                TargetScope::Global => &ring,
                TargetScope::Slide(index) if index == slide => &decoration,
                TargetScope::Slide(_) => continue,
            };
            entry.target.animate(animation);
            pulsed += 1;
        }
        pulsed
    }

    /// Replaces the rotation with one locked to `estimate`.
    pub fn apply_tempo(&mut self, estimate: &TempoEstimate) -> Animation {
        let seconds_per_beat = estimate.seconds_per_beat(self.min_bpm, self.max_bpm);
        let rotation = Animation::rotation(seconds_per_beat * self.config.rotation_factor * 1_000.0);

        for entry in self
            .targets
            .iter_mut()
            .filter(|entry| entry.scope == TargetScope::Global)
        {
            entry.target.animate(&rotation);
        }

        self.rotation = Some(rotation);
        rotation
    }

    pub fn publish_energy(&mut self, energy: f32, now_ms: f64) {
        self.shift.publish_level(energy, now_ms);
    }

    /// Per-frame update of the shift value.
    pub fn advance(&mut self, now_ms: f64) -> f32 {
        self.shift.advance(now_ms)
    }
}

impl fmt::Debug for VisualSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisualSync")
            .field("shift", &self.shift)
            .field("targets", &self.targets.len())
            .field("current_slide", &self.current_slide)
            .field("rotation", &self.rotation)
            .finish()
    }
}
