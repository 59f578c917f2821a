//! Simulation time model.
//!
//! # Design
//!
//! Time is represented as a monotonically increasing `Step` counter shared by
//! every worker of a run.  The mapping to simulated seconds is held in
//! `StepClock`:
//!
//!   simulated_secs = step / steps_per_second
//!
//! Integer steps are the unit of every coordination decision: message tags,
//! report keys, gridlock windows.  Floating-point seconds only appear inside
//! the local physics step.

use std::fmt;

// ── Step ──────────────────────────────────────────────────────────────────────

/// An absolute simulation step counter.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Step(pub u64);

impl Step {
    pub const ZERO: Step = Step(0);

    /// The step immediately after `self`.
    #[inline]
    pub fn next(self) -> Step {
        Step(self.0 + 1)
    }

    /// Return the step `n` steps after `self`.
    #[inline]
    pub fn offset(self, n: u64) -> Step {
        Step(self.0 + n)
    }

    /// Steps elapsed from `earlier` to `self`, saturating at zero.
    #[inline]
    pub fn since(self, earlier: Step) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl std::ops::Add<u64> for Step {
    type Output = Step;
    #[inline]
    fn add(self, rhs: u64) -> Step {
        Step(self.0 + rhs)
    }
}

impl std::ops::Sub for Step {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: Step) -> u64 {
        self.0 - rhs.0
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

// ── StepClock ─────────────────────────────────────────────────────────────────

/// A worker's local clock.
///
/// Holds no heap data.  Each worker owns one; in the server-less protocol
/// workers advance their clocks independently and only converge through the
/// border exchange.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StepClock {
    /// Simulation steps per simulated second.
    pub steps_per_second: u32,
    /// The current step, advanced by [`StepClock::advance`].
    pub current: Step,
}

impl StepClock {
    pub fn new(steps_per_second: u32, start: Step) -> Self {
        Self { steps_per_second, current: start }
    }

    /// Advance the clock by one step.
    #[inline]
    pub fn advance(&mut self) {
        self.current = self.current.next();
    }

    /// Duration of one step in simulated seconds.
    #[inline]
    pub fn step_secs(&self) -> f32 {
        1.0 / self.steps_per_second.max(1) as f32
    }

    /// Simulated seconds elapsed at `current`.
    #[inline]
    pub fn elapsed_secs(&self) -> f64 {
        self.current.0 as f64 / self.steps_per_second.max(1) as f64
    }

    /// How many steps span `secs` simulated seconds (rounded up).
    #[inline]
    pub fn steps_for_secs(&self, secs: f64) -> u64 {
        (secs * self.steps_per_second as f64).ceil().max(0.0) as u64
    }
}

impl fmt::Display for StepClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed_secs() as u64;
        write!(f, "{} ({:02}:{:02}:{:02})", self.current, secs / 3_600, (secs % 3_600) / 60, secs % 60)
    }
}
