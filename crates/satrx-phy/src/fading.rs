//! Markov-chain fading.
//!
//! The channel is in one of a finite number of fade states. Every tick the
//! next state is drawn from the current row of the active set's transition
//! matrix. Several sets can be configured for different elevation angles.

use crate::interference::from_db;
use rand::Rng;
use satrx_common::SimTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ROW_SUM_TOLERANCE: f64 = 1e-6;

/// Errors in a fading configuration.
#[derive(Debug, Error, PartialEq)]
pub enum FadingError {
    /// No sets were configured.
    #[error("Markov fading needs at least one set")]
    NoSets,

    /// Tick interval must be at least one microsecond.
    #[error("Markov fading tick must be at least 1 µs, got {0} s")]
    InvalidTick(f64),

    /// Transition matrix has the wrong shape.
    #[error("set {set}: transition matrix must be {states}x{states}")]
    NotSquare {
        /// Set index.
        set: usize,
        /// Expected state count.
        states: usize,
    },

    /// Sets disagree on the number of states.
    #[error("set {set} has {found} states, expected {expected}")]
    StateCountMismatch {
        /// Set index.
        set: usize,
        /// States in this set.
        found: usize,
        /// States in set 0.
        expected: usize,
    },

    /// A probability is negative or not finite.
    #[error("set {set}: invalid transition probability at row {row}, column {col}")]
    InvalidProbability {
        /// Set index.
        set: usize,
        /// Row.
        row: usize,
        /// Column.
        col: usize,
    },

    /// A row does not sum to one.
    #[error("set {set}: row {row} sums to {sum}, expected 1")]
    RowSum {
        /// Set index.
        set: usize,
        /// Row.
        row: usize,
        /// Actual sum.
        sum: f64,
    },

    /// Set or state index out of range.
    #[error("set {set} / state {state} out of range")]
    OutOfRange {
        /// Requested set.
        set: usize,
        /// Requested state.
        state: usize,
    },
}

/// One elevation-dependent fading set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkovSet {
    /// Elevation angle this set applies to (degrees).
    pub elevation_deg: f64,
    /// Fade depth per state (dB, positive means attenuation).
    pub fade_db: Vec<f64>,
    /// Row-stochastic transition matrix.
    pub transitions: Vec<Vec<f64>>,
}

/// Markov fading configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkovConf {
    /// Interval between state evaluations (seconds).
    pub tick_s: f64,
    /// Fading sets.
    pub sets: Vec<MarkovSet>,
    /// Set in use at start.
    #[serde(default)]
    pub initial_set: usize,
    /// State in use at start.
    #[serde(default)]
    pub initial_state: usize,
    /// Start with transitions frozen.
    #[serde(default)]
    pub locked: bool,
}

impl MarkovConf {
    /// Check shapes and probabilities.
    pub fn validate(&self) -> Result<(), FadingError> {
        // A tick that rounds to zero would re-arm at the same instant forever.
        if !self.tick_s.is_finite() || SimTime::from_secs(self.tick_s) == SimTime::ZERO {
            return Err(FadingError::InvalidTick(self.tick_s));
        }
        let first = self.sets.first().ok_or(FadingError::NoSets)?;
        let states = first.fade_db.len();
        for (set, s) in self.sets.iter().enumerate() {
            if s.fade_db.len() != states {
                return Err(FadingError::StateCountMismatch {
                    set,
                    found: s.fade_db.len(),
                    expected: states,
                });
            }
            if s.transitions.len() != states || s.transitions.iter().any(|r| r.len() != states) {
                return Err(FadingError::NotSquare { set, states });
            }
            for (row, r) in s.transitions.iter().enumerate() {
                if let Some(col) = r.iter().position(|p| !p.is_finite() || *p < 0.0) {
                    return Err(FadingError::InvalidProbability { set, row, col });
                }
                let sum: f64 = r.iter().sum();
                if (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
                    return Err(FadingError::RowSum { set, row, sum });
                }
            }
        }
        if self.initial_set >= self.sets.len() || self.initial_state >= states {
            return Err(FadingError::OutOfRange {
                set: self.initial_set,
                state: self.initial_state,
            });
        }
        Ok(())
    }
}

/// Markov fading state of one receiver.
#[derive(Debug, Clone)]
pub struct MarkovFading {
    conf: MarkovConf,
    tick: SimTime,
    set: usize,
    state: usize,
    locked: bool,
    last_evaluation: SimTime,
    last_transition: SimTime,
}

impl MarkovFading {
    /// Create a fading model from a validated configuration.
    pub fn new(conf: MarkovConf) -> Result<Self, FadingError> {
        conf.validate()?;
        Ok(MarkovFading {
            tick: SimTime::from_secs(conf.tick_s),
            set: conf.initial_set,
            state: conf.initial_state,
            locked: conf.locked,
            last_evaluation: SimTime::ZERO,
            last_transition: SimTime::ZERO,
            conf,
        })
    }

    /// Tick interval.
    pub fn tick(&self) -> SimTime {
        self.tick
    }

    /// Advance the chain if a tick has elapsed since the last evaluation.
    ///
    /// Returns `true` if the state changed. Never draws while locked.
    pub fn evaluate_state_change<R: Rng>(&mut self, now: SimTime, rng: &mut R) -> bool {
        if self.locked || now < self.last_evaluation + self.tick {
            return false;
        }
        self.last_evaluation = now;
        let row = &self.conf.sets[self.set].transitions[self.state];
        let u: f64 = rng.gen();
        let mut cumulative = 0.0;
        let mut next = row.len() - 1;
        for (j, p) in row.iter().enumerate() {
            cumulative += p;
            if u < cumulative {
                next = j;
                break;
            }
        }
        if next == self.state {
            return false;
        }
        self.state = next;
        self.last_transition = now;
        true
    }

    /// Force a set and state and freeze transitions.
    pub fn lock_to_set_and_state(&mut self, set: usize, state: usize) -> Result<(), FadingError> {
        if set >= self.conf.sets.len() || state >= self.state_count() {
            return Err(FadingError::OutOfRange { set, state });
        }
        self.set = set;
        self.state = state;
        self.locked = true;
        Ok(())
    }

    /// Resume transitions.
    pub fn unlock(&mut self) {
        self.locked = false;
    }

    /// Whether transitions are frozen.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Switch to the set with the closest elevation. The state index is kept.
    pub fn select_set_for_elevation(&mut self, elevation_deg: f64) {
        let mut best = self.set;
        let mut best_diff = f64::INFINITY;
        for (i, s) in self.conf.sets.iter().enumerate() {
            let diff = (s.elevation_deg - elevation_deg).abs();
            if diff < best_diff {
                best = i;
                best_diff = diff;
            }
        }
        self.set = best;
    }

    /// Number of states per set.
    pub fn state_count(&self) -> usize {
        self.conf.sets[0].fade_db.len()
    }

    /// Current state index.
    pub fn current_state(&self) -> usize {
        self.state
    }

    /// Current set index.
    pub fn current_set(&self) -> usize {
        self.set
    }

    /// Time of the last state change.
    pub fn last_transition(&self) -> SimTime {
        self.last_transition
    }

    /// Current fade depth (dB).
    pub fn fade_db(&self) -> f64 {
        self.conf.sets[self.set].fade_db[self.state]
    }

    /// Current power gain (linear, at most 1 for non-negative fades).
    pub fn gain_linear(&self) -> f64 {
        from_db(-self.fade_db())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn two_state(p_leave: f64) -> MarkovConf {
        MarkovConf {
            tick_s: 1.0,
            sets: vec![
                MarkovSet {
                    elevation_deg: 20.0,
                    fade_db: vec![0.0, 10.0],
                    transitions: vec![vec![1.0 - p_leave, p_leave], vec![p_leave, 1.0 - p_leave]],
                },
                MarkovSet {
                    elevation_deg: 60.0,
                    fade_db: vec![0.0, 3.0],
                    transitions: vec![vec![1.0, 0.0], vec![1.0, 0.0]],
                },
            ],
            initial_set: 0,
            initial_state: 0,
            locked: false,
        }
    }

    #[test]
    fn test_validation() {
        assert!(two_state(0.5).validate().is_ok());
        let mut bad = two_state(0.5);
        bad.sets[0].transitions[1] = vec![0.5, 0.6];
        assert!(matches!(bad.validate(), Err(FadingError::RowSum { set: 0, row: 1, .. })));
        let mut bad = two_state(0.5);
        bad.sets[1].fade_db.push(1.0);
        assert!(matches!(bad.validate(), Err(FadingError::StateCountMismatch { set: 1, .. })));
        let mut bad = two_state(0.5);
        bad.sets[0].transitions[0] = vec![1.5, -0.5];
        assert!(matches!(bad.validate(), Err(FadingError::InvalidProbability { col: 1, .. })));
        let mut bad = two_state(0.5);
        bad.sets[0].transitions.pop();
        assert!(matches!(bad.validate(), Err(FadingError::NotSquare { .. })));
        let mut bad = two_state(0.5);
        bad.tick_s = 0.0;
        assert!(matches!(bad.validate(), Err(FadingError::InvalidTick(_))));
    }

    #[test]
    fn test_sub_microsecond_tick_rejected() {
        for tick_s in [1e-7, 4.9e-7, -1.0, f64::INFINITY, f64::NAN] {
            let mut conf = two_state(1.0);
            conf.tick_s = tick_s;
            assert!(
                matches!(MarkovFading::new(conf), Err(FadingError::InvalidTick(_))),
                "tick {} accepted",
                tick_s
            );
        }
        let mut conf = two_state(1.0);
        conf.tick_s = 1e-6;
        let mut fading = MarkovFading::new(conf).unwrap();
        assert_eq!(fading.tick(), SimTime::from_micros(1));

        // At most one transition per instant even with the shortest tick.
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let now = SimTime::from_micros(1);
        let transitions = (0..5).filter(|_| fading.evaluate_state_change(now, &mut rng)).count();
        assert_eq!(transitions, 1);
    }

    #[test]
    fn test_idempotent_within_instant() {
        let mut fading = MarkovFading::new(two_state(1.0)).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        // No tick elapsed yet.
        assert!(!fading.evaluate_state_change(SimTime::from_millis(500), &mut rng));
        let now = SimTime::from_secs(1.0);
        assert!(fading.evaluate_state_change(now, &mut rng));
        assert_eq!(fading.current_state(), 1);
        assert!(!fading.evaluate_state_change(now, &mut rng));
        assert_eq!(fading.current_state(), 1);
        assert_eq!(fading.last_transition(), now);
    }

    #[test]
    fn test_lock_freezes_without_drawing() {
        let mut fading = MarkovFading::new(two_state(1.0)).unwrap();
        fading.lock_to_set_and_state(0, 1).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut reference = ChaCha8Rng::seed_from_u64(42);
        for s in 1..10 {
            assert!(!fading.evaluate_state_change(SimTime::from_secs(s as f64), &mut rng));
        }
        assert_eq!(rng.gen::<u64>(), reference.gen::<u64>());
        assert!((fading.fade_db() - 10.0).abs() < 1e-12);
        assert!((fading.gain_linear() - 0.1).abs() < 1e-12);
        assert!(fading.lock_to_set_and_state(5, 0).is_err());

        fading.unlock();
        assert!(fading.evaluate_state_change(SimTime::from_secs(20.0), &mut rng));
        assert_eq!(fading.current_state(), 0);
    }

    #[test]
    fn test_select_set_keeps_state() {
        let mut fading = MarkovFading::new(two_state(0.5)).unwrap();
        fading.lock_to_set_and_state(0, 1).unwrap();
        fading.select_set_for_elevation(55.0);
        assert_eq!(fading.current_set(), 1);
        assert_eq!(fading.current_state(), 1);
        assert!((fading.fade_db() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_seeded_runs_match() {
        let run = || {
            let mut fading = MarkovFading::new(two_state(0.3)).unwrap();
            let mut rng = ChaCha8Rng::seed_from_u64(7);
            (1..200)
                .map(|s| {
                    fading.evaluate_state_change(SimTime::from_secs(s as f64), &mut rng);
                    fading.current_state()
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
