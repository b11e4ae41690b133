//! Fixed-step physics scheduling.
//!
//! Wall-clock time is accumulated (scaled by time acceleration) and consumed
//! in steps of exactly one physics timestep. Whatever is left over becomes
//! the interpolation fraction the renderer blends with.

use crate::model::game::Game;

/// Something advanced in fixed physics steps
pub trait FixedStepTarget {
    fn step(&mut self, step: f64);

    /// True while interpolation would be meaningless and rendering should
    /// use the latest physics state as-is
    fn hold_interpolation(&self) -> bool {
        false
    }
}

impl FixedStepTarget for Game {
    fn step(&mut self, step: f64) {
        Game::step(self, step);
    }

    fn hold_interpolation(&self) -> bool {
        self.is_dock_transition()
    }
}

/// Outcome of one frame's worth of stepping
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepReport {
    pub steps: u32,
    pub alpha: f64,
    /// Un-simulated seconds thrown away because the step budget ran out
    pub discarded: f64,
}

#[derive(Debug, Clone)]
pub struct FixedStepAccumulator {
    accumulator: f64,
    alpha: f64,
    max_steps: u32,
    max_frame_time: f64,
}

impl FixedStepAccumulator {
    pub fn new(max_steps: u32, max_frame_time: f64) -> Self {
        Self {
            accumulator: 0.0,
            alpha: 0.0,
            max_steps: max_steps.max(1),
            max_frame_time,
        }
    }

    pub fn accumulated(&self) -> f64 {
        self.accumulator
    }

    /// Interpolation fraction of the last frame
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Drop any backlog. Called when time acceleration changes.
    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }

    /// Consume `frame_time` wall seconds at acceleration `rate`, stepping
    /// `target` in increments of `step`.
    ///
    /// A non-positive `step` means paused: nothing is stepped and the
    /// previous alpha is kept.
    pub fn advance<T: FixedStepTarget + ?Sized>(&mut self, frame_time: f64, rate: f64, step: f64, target: &mut T) -> StepReport {
        let frame_time = frame_time.clamp(0.0, self.max_frame_time);

        if !(step > 0.0) {
            return StepReport { steps: 0, alpha: self.alpha, discarded: 0.0 };
        }

        self.accumulator += frame_time * rate;

        let mut steps = 0;
        while self.accumulator >= step && steps < self.max_steps {
            target.step(step);
            self.accumulator -= step;
            steps += 1;
        }

        let mut discarded = 0.0;
        if self.accumulator >= step {
            discarded = self.accumulator;
            tracing::debug!(steps, discarded, "physics step budget exhausted, dropping backlog");
            self.accumulator = 0.0;
        }

        self.alpha = if target.hold_interpolation() {
            1.0
        } else {
            (self.accumulator / step).clamp(0.0, 1.0)
        };

        StepReport { steps, alpha: self.alpha, discarded }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        steps: Vec<f64>,
        docking: bool,
    }

    impl FixedStepTarget for Counter {
        fn step(&mut self, step: f64) {
            self.steps.push(step);
        }

        fn hold_interpolation(&self) -> bool {
            self.docking
        }
    }

    #[test]
    fn test_three_steps_and_half_alpha() {
        // 0.35 exceeds the usual 0.25 clamp
        let mut acc = FixedStepAccumulator::new(4, 1.0);
        let mut target = Counter::default();
        let report = acc.advance(0.35, 1.0, 0.1, &mut target);
        assert_eq!(report.steps, 3);
        assert_eq!(target.steps, vec![0.1; 3]);
        assert!((report.alpha - 0.5).abs() < 1e-9);
        assert_eq!(report.discarded, 0.0);
    }

    #[test]
    fn test_stall_is_clamped_before_accumulation() {
        let mut acc = FixedStepAccumulator::new(100, 0.25);
        let mut target = Counter::default();
        let report = acc.advance(5.0, 1.0, 0.1, &mut target);
        assert_eq!(report.steps, 2);
        assert!((acc.accumulated() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_budget_exhausted_discards_remainder() {
        let mut acc = FixedStepAccumulator::new(4, 0.25);
        let mut target = Counter::default();
        let report = acc.advance(0.25, 10.0, 0.1, &mut target);
        assert_eq!(report.steps, 4);
        assert!(report.discarded > 2.0);
        assert_eq!(acc.accumulated(), 0.0);
        assert_eq!(report.alpha, 0.0);

        // nothing carries over
        let report = acc.advance(0.0, 10.0, 0.1, &mut target);
        assert_eq!(report.steps, 0);
    }

    #[test]
    fn test_paused_holds_alpha() {
        let mut acc = FixedStepAccumulator::new(4, 0.25);
        let mut target = Counter::default();
        let first = acc.advance(0.15, 1.0, 0.1, &mut target);
        let paused = acc.advance(0.2, 0.0, 0.0, &mut target);
        assert_eq!(paused.steps, 0);
        assert_eq!(paused.alpha, first.alpha);
        assert_eq!(target.steps.len(), 1);
    }

    #[test]
    fn test_dock_transition_pins_alpha() {
        let mut acc = FixedStepAccumulator::new(4, 0.25);
        let mut target = Counter { docking: true, ..Counter::default() };
        let report = acc.advance(0.15, 1.0, 0.1, &mut target);
        assert_eq!(report.steps, 1);
        assert_eq!(report.alpha, 1.0);
    }

    #[test]
    fn test_step_count_matches_floor() {
        let step = 1.0 / 60.0;
        for i in 0..=25 {
            let frame_time = i as f64 * 0.01;
            let mut acc = FixedStepAccumulator::new(4, 0.25);
            let mut target = Counter::default();
            let report = acc.advance(frame_time, 1.0, step, &mut target);
            let expected = ((frame_time / step).floor() as u32).min(4);
            // floating error may land one short on an exact multiple
            assert!(report.steps == expected || report.steps + 1 == expected, "{frame_time}");
            assert!((0.0..=1.0).contains(&report.alpha));
        }
    }

    #[test]
    fn test_reset_drops_backlog() {
        let mut acc = FixedStepAccumulator::new(4, 0.25);
        let mut target = Counter::default();
        acc.advance(0.05, 1.0, 0.1, &mut target);
        assert!(acc.accumulated() > 0.0);
        acc.reset();
        assert_eq!(acc.accumulated(), 0.0);
    }
}
