//! Round-based benchmarking harness.
//!
//! A run executes a fixed number of rounds of a three-phase scenario:
//! `setup` establishes the round's preconditions, `action` is the timed
//! code path under measurement, and `validate` decides whether the round
//! reproduced the intended allocator state. Phases are strictly sequenced
//! and single-threaded: round *n+1*'s setup does not begin until round
//! *n*'s validate has returned.
//!
//! The two failure channels are deliberately distinct. `validate`
//! returning `Ok(false)` is a failed round: it is counted, its elapsed
//! time is excluded from the mean, and the run continues. An `Err` from
//! any phase is an infrastructure failure: the run stops immediately and
//! the error propagates to the caller (and, in the scenario programs, out
//! of `main`). The harness never conflates a broken measurement channel
//! with a genuinely failed scenario.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar};
use log::{debug, info};
use serde::Serialize;

use crate::util::NamedProgress;

/// A three-phase benchmark scenario.
///
/// Implementors hold whatever state the phases share (probe handle,
/// mappings, spray files); the harness only drives the lifecycle.
pub trait Scenario {
    /// Infrastructure error type of the three phases.
    type Error: std::error::Error;

    /// Establishes or repairs this round's preconditions.
    ///
    /// Resources allocated here are owned by the scenario and must be
    /// released by [`validate`](Scenario::validate) of the same round or
    /// by the scenario's own teardown; the harness does not track them.
    ///
    /// # Errors
    ///
    /// An error aborts the run.
    fn setup(&mut self) -> Result<(), Self::Error>;

    /// The code path under measurement.
    ///
    /// # Errors
    ///
    /// An error aborts the run.
    fn action(&mut self) -> Result<(), Self::Error>;

    /// Checks whether the round's postcondition held.
    ///
    /// # Errors
    ///
    /// An error aborts the run; `Ok(false)` only fails the round.
    fn validate(&mut self) -> Result<bool, Self::Error>;
}

/// Adapter turning three plain callbacks into a [`Scenario`].
///
/// The callbacks cannot signal infrastructure failures; scenarios that
/// need an error channel implement [`Scenario`] directly.
pub struct FnScenario<P, A, V> {
    setup: P,
    action: A,
    validate: V,
}

impl<P: FnMut(), A: FnMut(), V: FnMut() -> bool> FnScenario<P, A, V> {
    /// Wraps `setup`, `action` and `validate` callbacks.
    pub fn new(setup: P, action: A, validate: V) -> Self {
        FnScenario {
            setup,
            action,
            validate,
        }
    }
}

impl<P: FnMut(), A: FnMut(), V: FnMut() -> bool> Scenario for FnScenario<P, A, V> {
    type Error = Infallible;

    fn setup(&mut self) -> Result<(), Self::Error> {
        (self.setup)();
        Ok(())
    }

    fn action(&mut self) -> Result<(), Self::Error> {
        (self.action)();
        Ok(())
    }

    fn validate(&mut self) -> Result<bool, Self::Error> {
        Ok((self.validate)())
    }
}

/// Outcome of a single round.
///
/// Produced once per round and consumed immediately for aggregation; the
/// harness does not retain per-round history.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct RoundOutcome {
    /// Zero-based round index.
    pub round: u64,
    /// Time spent in the action phase, at monotonic-clock resolution.
    pub elapsed: Duration,
    /// Whether the round's postcondition held.
    pub passed: bool,
}

/// Statistics aggregated across one run.
#[derive(Clone, Debug, Serialize)]
pub struct RunStats {
    rounds: u64,
    failed_rounds: u64,
    pass_time: Duration,
}

impl RunStats {
    fn new(rounds: u64) -> Self {
        RunStats {
            rounds,
            failed_rounds: 0,
            pass_time: Duration::ZERO,
        }
    }

    fn record(&mut self, outcome: &RoundOutcome) {
        if outcome.passed {
            self.pass_time += outcome.elapsed;
        } else {
            self.failed_rounds += 1;
        }
    }

    /// Total number of rounds executed.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Number of rounds whose postcondition did not hold.
    pub fn failed_rounds(&self) -> u64 {
        self.failed_rounds
    }

    /// Number of rounds whose postcondition held.
    pub fn passing_rounds(&self) -> u64 {
        self.rounds - self.failed_rounds
    }

    /// Arithmetic mean of the elapsed time over passing rounds only.
    ///
    /// Failing rounds are excluded: their action's effect is by definition
    /// not the state being measured. Returns `None` when no round passed;
    /// the mean is undefined in that case, never a division by zero.
    pub fn mean_pass_time(&self) -> Option<Duration> {
        let passing = self.passing_rounds();
        if passing == 0 {
            return None;
        }
        let nanos = self.pass_time.as_nanos() / u128::from(passing);
        Some(Duration::from_nanos(nanos as u64))
    }

    /// The two-line run summary.
    pub fn summary(&self) -> String {
        let mean = match self.mean_pass_time() {
            Some(mean) => format!("{} ns", mean.as_nanos()),
            None => "undefined (no passing rounds)".to_string(),
        };
        format!(
            "failed rounds: {}/{}\nmean time over passing rounds: {}",
            self.failed_rounds, self.rounds, mean
        )
    }
}

/// Executes a fixed number of rounds of a [`Scenario`].
pub struct Harness {
    rounds: u64,
    progress: Option<MultiProgress>,
}

impl Harness {
    /// Creates a harness running `rounds` rounds.
    ///
    /// # Panics
    ///
    /// Panics if `rounds` is zero.
    pub fn new(rounds: u64) -> Self {
        assert!(rounds > 0, "round count must be positive");
        Harness {
            rounds,
            progress: None,
        }
    }

    /// Attaches a progress bar to the run.
    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Runs the scenario and returns the aggregated statistics.
    ///
    /// Rounds execute strictly in order with no overlap. There is no
    /// per-round timeout and no retry: a hang in a phase hangs the run,
    /// and a flaky round is recorded as a failure.
    ///
    /// # Errors
    ///
    /// Propagates the first infrastructure error a phase reports; the
    /// statistics of the aborted run are discarded.
    pub fn run<S: Scenario>(&self, scenario: &mut S) -> Result<RunStats, S::Error> {
        let bar = self.progress.as_ref().map(|p| {
            let bar = p.add(ProgressBar::new(self.rounds));
            bar.set_style(indicatif::ProgressStyle::named_bar("Rounds"));
            bar
        });

        let mut stats = RunStats::new(self.rounds);
        for round in 0..self.rounds {
            debug!("round {round}");
            scenario.setup()?;

            let start = Instant::now();
            scenario.action()?;
            let elapsed = start.elapsed();

            let passed = scenario.validate()?;
            let outcome = RoundOutcome {
                round,
                elapsed,
                passed,
            };
            if passed {
                info!("round {round}: PASS ({} ns)", elapsed.as_nanos());
            } else {
                info!("round {round}: FAIL");
            }
            stats.record(&outcome);
            if let Some(bar) = &bar {
                bar.set_position(round + 1);
            }
        }
        if let Some(bar) = &bar {
            bar.finish();
        }

        for line in stats.summary().lines() {
            info!("{line}");
        }
        Ok(stats)
    }
}

/// Runs `rounds` rounds of three plain callbacks.
///
/// Convenience wrapper over [`Harness`] and [`FnScenario`] for scenarios
/// without an infrastructure error channel.
pub fn run_rounds(
    rounds: u64,
    setup: impl FnMut(),
    action: impl FnMut(),
    validate: impl FnMut() -> bool,
) -> RunStats {
    let mut scenario = FnScenario::new(setup, action, validate);
    match Harness::new(rounds).run(&mut scenario) {
        Ok(stats) => stats,
        Err(e) => match e {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_all_passing_rounds() {
        let stats = run_rounds(5, || {}, || {}, || true);
        assert_eq!(stats.rounds(), 5);
        assert_eq!(stats.failed_rounds(), 0);
        assert_eq!(stats.passing_rounds(), 5);
        assert!(stats.mean_pass_time().is_some());
    }

    #[test]
    fn test_all_failing_rounds_have_undefined_mean() {
        let stats = run_rounds(4, || {}, || {}, || false);
        assert_eq!(stats.failed_rounds(), 4);
        assert_eq!(stats.mean_pass_time(), None);
        assert!(stats.summary().contains("undefined"));
    }

    #[test]
    fn test_failed_rounds_never_exceed_rounds() {
        for rounds in 1..=8 {
            let mut flip = false;
            let stats = run_rounds(rounds, || {}, || {}, || {
                flip = !flip;
                flip
            });
            assert!(stats.failed_rounds() <= rounds);
        }
    }

    #[test]
    fn test_alternating_validation() {
        // true, false, true over three rounds: one failure, mean over the
        // two passing rounds only.
        let mut round = 0;
        let stats = run_rounds(3, || {}, || {}, || {
            round += 1;
            round != 2
        });
        assert_eq!(stats.failed_rounds(), 1);
        assert_eq!(stats.passing_rounds(), 2);
        assert!(stats.mean_pass_time().is_some());
    }

    #[test]
    fn test_phase_ordering_is_strict_and_non_overlapping() {
        let trace: RefCell<Vec<(&str, u64)>> = RefCell::new(Vec::new());
        let round = RefCell::new(0u64);
        let stats = run_rounds(
            3,
            || {
                *round.borrow_mut() += 1;
                trace.borrow_mut().push(("setup", *round.borrow()));
            },
            || trace.borrow_mut().push(("action", *round.borrow())),
            || {
                trace.borrow_mut().push(("validate", *round.borrow()));
                true
            },
        );
        assert_eq!(stats.rounds(), 3);

        let expected: Vec<(&str, u64)> = (1..=3)
            .flat_map(|r| [("setup", r), ("action", r), ("validate", r)])
            .collect();
        assert_eq!(*trace.borrow(), expected);
    }

    #[test]
    fn test_mean_is_arithmetic_mean_of_passing_rounds() {
        struct Sleepy {
            round: u64,
        }
        impl Scenario for Sleepy {
            type Error = Infallible;
            fn setup(&mut self) -> Result<(), Infallible> {
                Ok(())
            }
            fn action(&mut self) -> Result<(), Infallible> {
                std::thread::sleep(Duration::from_millis(2));
                Ok(())
            }
            fn validate(&mut self) -> Result<bool, Infallible> {
                self.round += 1;
                Ok(self.round != 1)
            }
        }

        let stats = Harness::new(3).run(&mut Sleepy { round: 0 }).unwrap();
        assert_eq!(stats.failed_rounds(), 1);
        // Each passing action slept 2ms; the mean must be at least that
        // and not absorb the failing round's time twice.
        let mean = stats.mean_pass_time().unwrap();
        assert!(mean >= Duration::from_millis(2));
    }

    #[test]
    fn test_infrastructure_error_aborts_run() {
        #[derive(Debug, thiserror::Error)]
        #[error("probe channel broke")]
        struct Broken;

        struct FailsOnSecondAction {
            calls: u64,
        }
        impl Scenario for FailsOnSecondAction {
            type Error = Broken;
            fn setup(&mut self) -> Result<(), Broken> {
                Ok(())
            }
            fn action(&mut self) -> Result<(), Broken> {
                self.calls += 1;
                if self.calls == 2 { Err(Broken) } else { Ok(()) }
            }
            fn validate(&mut self) -> Result<bool, Broken> {
                Ok(true)
            }
        }

        let mut scenario = FailsOnSecondAction { calls: 0 };
        let result = Harness::new(10).run(&mut scenario);
        assert!(result.is_err());
        // The failing call was the last one; no further rounds ran.
        assert_eq!(scenario.calls, 2);
    }

    #[test]
    #[should_panic(expected = "round count must be positive")]
    fn test_zero_rounds_is_rejected() {
        Harness::new(0);
    }
}
