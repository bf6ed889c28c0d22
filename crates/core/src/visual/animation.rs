use serde::{Deserialize, Serialize};

use crate::config::VisualConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Easing {
    Linear,
    /// Quadratic ease-out, `p * (2 - p)`.
    EaseOut,
}

impl Easing {
    pub fn apply(self, progress: f32) -> f32 {
        let p = progress.clamp(0.0, 1.0);
        match self {
            Self::Linear => p,
            Self::EaseOut => p * (2.0 - p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Iterations {
    Once,
    Infinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnimationKind {
    Pulse,
    /// Small scale bump on slide decorations that settles back to rest.
    SlidePulse,
    Rotation,
}

/// Visual state at one point of an animation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub scale: f32,
    pub rotation_deg: f32,
    pub opacity: f32,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        rotation_deg: 0.0,
        opacity: 1.0,
    };

    fn lerp(self, to: Self, t: f32) -> Self {
        Self {
            scale: self.scale + (to.scale - self.scale) * t,
            rotation_deg: self.rotation_deg + (to.rotation_deg - self.rotation_deg) * t,
            opacity: self.opacity + (to.opacity - self.opacity) * t,
        }
    }
}

/// Keyframed animation handed to visual targets: `from` to `to`, and back to
/// `from` again when `returns_to_start` is set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Animation {
    pub kind: AnimationKind,
    pub from: Transform,
    pub to: Transform,
    pub duration_ms: f64,
    pub easing: Easing,
    pub iterations: Iterations,
    pub returns_to_start: bool,
}

impl Animation {
    /// Scale pulse sized by beat strength; the boost never exceeds the
    /// configured cap.
    pub fn pulse(strength: f32, config: &VisualConfig) -> Self {
        let strength = if strength.is_finite() { strength.clamp(0.0, 1.0) } else { 0.0 };
        let boost = (strength * config.pulse_gain).min(config.pulse_max_boost).max(0.0);

        Self {
            kind: AnimationKind::Pulse,
            from: Transform::IDENTITY,
            to: Transform {
                scale: 1.0 + boost,
                rotation_deg: 0.0,
                opacity: config.pulse_end_opacity,
            },
            duration_ms: config.pulse_duration_ms,
            easing: Easing::EaseOut,
            iterations: Iterations::Once,
            returns_to_start: false,
        }
    }

    /// Decoration bump: scales up and back down with no fade.
    pub fn slide_pulse(strength: f32, config: &VisualConfig) -> Self {
        let strength = if strength.is_finite() { strength.clamp(0.0, 1.0) } else { 0.0 };
        let boost = (strength * config.slide_pulse_gain)
            .min(config.slide_pulse_max_boost)
            .max(0.0);

        Self {
            kind: AnimationKind::SlidePulse,
            from: Transform::IDENTITY,
            to: Transform {
                scale: 1.0 + boost,
                ..Transform::IDENTITY
            },
            duration_ms: config.slide_pulse_duration_ms,
            easing: Easing::EaseOut,
            iterations: Iterations::Once,
            returns_to_start: true,
        }
    }

    /// Endless linear spin, one full turn per `cycle_ms`.
    pub fn rotation(cycle_ms: f64) -> Self {
        Self {
            kind: AnimationKind::Rotation,
            from: Transform::IDENTITY,
            to: Transform {
                rotation_deg: 360.0,
                ..Transform::IDENTITY
            },
            duration_ms: cycle_ms.max(1.0),
            easing: Easing::Linear,
            iterations: Iterations::Infinite,
            returns_to_start: false,
        }
    }

    pub fn is_finished(&self, elapsed_ms: f64) -> bool {
        self.iterations == Iterations::Once && elapsed_ms >= self.duration_ms
    }

    /// Evaluates the animation `elapsed_ms` after it started.
    pub fn sample(&self, elapsed_ms: f64) -> Transform {
        let elapsed = elapsed_ms.max(0.0);
        let progress = match self.iterations {
            Iterations::Once => (elapsed / self.duration_ms).min(1.0),
            Iterations::Infinite => (elapsed % self.duration_ms) / self.duration_ms,
        };
        let eased = self.easing.apply(progress as f32);
        let t = if self.returns_to_start {
            1.0 - (2.0 * eased - 1.0).abs()
        } else {
            eased
        };
        self.from.lerp(self.to, t)
    }
}
