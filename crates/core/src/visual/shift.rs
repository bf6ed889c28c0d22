/// Eased, process-wide intensity value in `[0, 1]`.
///
/// Energy published every frame retargets the value toward the current level.
/// A beat "kicks" the target above the level for one easing window. Without
/// new targets the value simply holds.
#[derive(Debug, Clone)]
pub struct ShiftState {
    value: f32,
    from: f32,
    target: f32,
    started_ms: f64,
    window_ms: f64,
    kick: f32,
    kick_target: f32,
    kick_until_ms: f64,
}

impl ShiftState {
    pub fn new(window_ms: f64, kick: f32) -> Self {
        Self {
            value: 0.0,
            from: 0.0,
            target: 0.0,
            started_ms: 0.0,
            window_ms: window_ms.max(1.0),
            kick: kick.max(0.0),
            kick_target: 0.0,
            kick_until_ms: f64::NEG_INFINITY,
        }
    }

    pub fn value(&self) -> f32 {
        self.value.clamp(0.0, 1.0)
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Raises the target to `current + strength * kick`, capped at 1.
    pub fn kick(&mut self, strength: f32, now_ms: f64) {
        let strength = if strength.is_finite() { strength.max(0.0) } else { 0.0 };
        let target = (self.value() + strength * self.kick).min(1.0);
        self.kick_target = target;
        self.kick_until_ms = now_ms + self.window_ms;
        self.retarget(target, now_ms);
    }

    /// Publishes the latest energy level. While a kick is in flight the kick
    /// target acts as a floor.
    pub fn publish_level(&mut self, level: f32, now_ms: f64) {
        let level = if level.is_finite() { level.clamp(0.0, 1.0) } else { 0.0 };
        let target = if now_ms < self.kick_until_ms {
            level.max(self.kick_target)
        } else {
            level
        };

        if (target - self.target).abs() > f32::EPSILON {
            self.retarget(target, now_ms);
        }
    }

    /// Moves the value along the quadratic ease-out curve and returns it.
    pub fn advance(&mut self, now_ms: f64) -> f32 {
        let progress = ((now_ms - self.started_ms) / self.window_ms).clamp(0.0, 1.0) as f32;
        let eased = progress * (2.0 - progress);
        self.value = (self.from + (self.target - self.from) * eased).clamp(0.0, 1.0);
        self.value
    }

    fn retarget(&mut self, target: f32, now_ms: f64) {
        self.from = self.value;
        self.target = target.clamp(0.0, 1.0);
        self.started_ms = now_ms;
    }
}

impl Default for ShiftState {
    fn default() -> Self {
        Self::new(350.0, 0.6)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn starts_at_zero_and_holds_without_input() {
        let mut shift = ShiftState::default();
        assert_eq!(shift.advance(0.0), 0.0);
        assert_eq!(shift.advance(10_000.0), 0.0);
    }

    #[test]
    fn eases_out_toward_the_level() {
        let mut shift = ShiftState::new(100.0, 0.6);
        shift.publish_level(0.8, 0.0);

        let half = shift.advance(50.0);
        // p = 0.5 -> eased 0.75
        assert!((half - 0.6).abs() < 1e-6);
        assert!((shift.advance(100.0) - 0.8).abs() < 1e-6);
        assert!((shift.advance(500.0) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn kick_floors_the_level_for_one_window() {
        let mut shift = ShiftState::new(100.0, 0.5);
        shift.kick(1.0, 0.0);
        assert!((shift.target() - 0.5).abs() < 1e-6);

        shift.publish_level(0.1, 10.0);
        assert!((shift.target() - 0.5).abs() < 1e-6);

        shift.publish_level(0.1, 120.0);
        assert!((shift.target() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn holds_last_eased_position_when_not_refreshed() {
        let mut shift = ShiftState::new(100.0, 0.6);
        shift.publish_level(1.0, 0.0);
        let value = shift.advance(100.0);
        assert_eq!(shift.advance(5_000.0), value);
    }

    proptest! {
        #[test]
        fn value_stays_clamped(
            events in prop::collection::vec((0.0f64..500.0, -2.0f32..3.0, any::<bool>()), 1..200),
            kick in 0.0f32..5.0,
        ) {
            let mut shift = ShiftState::new(350.0, kick);
            let mut now = 0.0;
            for (delta, amount, is_beat) in events {
                now += delta;
                if is_beat {
                    shift.kick(amount, now);
                } else {
                    shift.publish_level(amount, now);
                }
                let value = shift.advance(now);
                prop_assert!((0.0..=1.0).contains(&value));
                prop_assert!((0.0..=1.0).contains(&shift.value()));
            }
        }
    }
}
