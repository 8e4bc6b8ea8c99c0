//! Adaptive frame-window search for a unit cell.
//!
//! Starting at `autoindex_start`, the controller tries windows
//! `[start, start + width)` with `width` growing from `min_autoindex_frames`
//! by `autoindex_step` while it stays below `max_autoindex_frames`. Each
//! attempt finds, integrates and filters peaks in the window, then runs one
//! lattice search. The first window yielding a solution similar to the
//! reference cell wins.

use std::fmt;
use std::str::FromStr;

use tracing::{debug, info, warn};

use super::{Pipeline, Stage};
use crate::engine::{IndexOutcome, IndexSolution};
use crate::error::{DiffractError, Result};
use crate::experiment::Experiment;
use crate::model::{CollectionKind, FrameRange, UnitCell};

/// Working collection of peaks found in the current window.
pub const INDEXING_FOUND: &str = "indexing-found";

/// Working collection of filtered peaks handed to the lattice search.
pub const INDEXING: &str = "indexing";

/// How to choose among solutions matching the reference cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcceptPolicy {
    /// First matching solution in the engine's order.
    #[default]
    First,
    /// Highest-quality matching solution.
    Best,
}

impl FromStr for AcceptPolicy {
    type Err = DiffractError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "first" => Ok(AcceptPolicy::First),
            "best" => Ok(AcceptPolicy::Best),
            other => Err(DiffractError::Config(format!(
                "unknown accept_policy '{}' (expected first or best)",
                other
            ))),
        }
    }
}

impl AcceptPolicy {
    /// Pick a solution among those similar to `reference`.
    pub fn select<'s>(
        &self,
        solutions: &'s [IndexSolution],
        reference: &UnitCell,
        length_tol: f64,
        angle_tol: f64,
    ) -> Option<&'s IndexSolution> {
        let mut matching = solutions
            .iter()
            .filter(|s| s.cell.is_similar(reference, length_tol, angle_tol));
        match self {
            AcceptPolicy::First => matching.next(),
            AcceptPolicy::Best => matching.max_by(|a, b| a.quality.total_cmp(&b.quality)),
        }
    }
}

/// What happened in one window.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResult {
    Accepted { quality: f64 },
    /// Solutions came back but none matched the reference.
    NoMatch { solutions: usize },
    InsufficientData(String),
    /// No peaks survived finding or filtering.
    NoPeaks,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoindexAttempt {
    /// 1-based attempt number.
    pub attempt: usize,
    pub frames: FrameRange,
    pub found: usize,
    pub caught: usize,
    pub result: AttemptResult,
}

impl fmt::Display for AutoindexAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempt {} frames {}: {} found, {} caught, ",
            self.attempt, self.frames, self.found, self.caught
        )?;
        match &self.result {
            AttemptResult::Accepted { quality } => write!(f, "accepted (quality {:.3})", quality),
            AttemptResult::NoMatch { solutions } => {
                write!(f, "{} solutions, none match the reference", solutions)
            }
            AttemptResult::InsufficientData(reason) => write!(f, "insufficient data ({})", reason),
            AttemptResult::NoPeaks => write!(f, "no peaks"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoindexReport {
    pub attempts: Vec<AutoindexAttempt>,
    pub cell: UnitCell,
}

/// Frame windows tried by the controller, in order.
///
/// Bounded by ⌈(max − min) / step⌉; a window clamped to the end of the
/// dataset is the last one.
pub fn autoindex_windows(
    start: usize,
    min_width: usize,
    max_width: usize,
    step: usize,
    n_frames: usize,
) -> Vec<FrameRange> {
    let mut windows = Vec::new();
    if step == 0 || start >= n_frames {
        return windows;
    }
    let mut width = min_width;
    while width < max_width {
        let end = start + width;
        if end >= n_frames {
            windows.push(FrameRange::new(start, n_frames));
            break;
        }
        windows.push(FrameRange::new(start, end));
        width += step;
    }
    windows
}

/// Drives the retry loop through a [`Pipeline`].
pub struct AutoindexController<'p> {
    pipeline: &'p Pipeline,
}

impl<'p> AutoindexController<'p> {
    pub fn new(pipeline: &'p Pipeline) -> Self {
        Self { pipeline }
    }

    /// Run attempts until a cell is accepted or the window is exhausted.
    ///
    /// An experiment that already has an accepted cell returns it without attempts.
    pub fn run(&self, exp: &mut Experiment, dataset: &str) -> Result<AutoindexReport> {
        if let Some(cell) = exp.accepted_cell() {
            debug!("accepted cell already present, skipping autoindexing");
            return Ok(AutoindexReport {
                attempts: Vec::new(),
                cell: cell.clone(),
            });
        }

        let params = exp.config.autoindexer.clone();
        let filter = exp.config.filter.clone();
        let policy: AcceptPolicy = params.accept_policy.parse()?;
        let space_group = exp.config.cell.space_group_symbol();
        let reference = exp.reference_cell()?.clone();
        let n_frames = exp.dataset(dataset)?.n_frames();

        let windows = autoindex_windows(
            params.autoindex_start,
            params.min_autoindex_frames,
            params.max_autoindex_frames,
            params.autoindex_step,
            n_frames,
        );

        let mut attempts = Vec::new();
        for (i, frames) in windows.iter().enumerate() {
            self.pipeline.check_cancelled(Stage::Index)?;

            let found = self
                .pipeline
                .find_peaks(exp, dataset, *frames, INDEXING_FOUND)?;
            let mut attempt = AutoindexAttempt {
                attempt: i + 1,
                frames: *frames,
                found: found.count,
                caught: 0,
                result: AttemptResult::NoPeaks,
            };

            if found.count > 0 {
                self.pipeline.integrate(exp, dataset, INDEXING_FOUND)?;
                let filtered = self.pipeline.filter_peaks(
                    exp,
                    INDEXING_FOUND,
                    &filter,
                    INDEXING,
                    CollectionKind::Indexing,
                )?;
                attempt.caught = filtered.count;

                if filtered.count > 0 {
                    match self.pipeline.autoindex(exp, INDEXING)? {
                        IndexOutcome::Indexed(solutions) => {
                            match policy.select(
                                &solutions,
                                &reference,
                                params.length_tol,
                                params.angle_tol,
                            ) {
                                Some(solution) => {
                                    attempt.result = AttemptResult::Accepted {
                                        quality: solution.quality,
                                    };
                                    let cell =
                                        solution.cell.clone().with_space_group(space_group.clone());
                                    self.pipeline.notify_attempt(&attempt);
                                    info!(attempts = i + 1, %frames, cell = %cell, "autoindexing succeeded");
                                    attempts.push(attempt);
                                    exp.set_accepted_cell(cell.clone());
                                    return Ok(AutoindexReport { attempts, cell });
                                }
                                None => {
                                    attempt.result = AttemptResult::NoMatch {
                                        solutions: solutions.len(),
                                    };
                                }
                            }
                        }
                        IndexOutcome::InsufficientData(reason) => {
                            attempt.result = AttemptResult::InsufficientData(reason);
                        }
                        IndexOutcome::Fatal(message) => {
                            return Err(DiffractError::Engine {
                                stage: Stage::Index,
                                message,
                            });
                        }
                    }
                }
            }

            debug!(%attempt, "autoindex attempt failed, widening window");
            self.pipeline.notify_attempt(&attempt);
            attempts.push(attempt);
        }

        let last = windows
            .last()
            .copied()
            .unwrap_or(FrameRange::new(params.autoindex_start, params.autoindex_start));
        warn!(attempts = attempts.len(), last_window = %last, "autoindexing exhausted");
        Err(DiffractError::AutoindexFailed {
            attempts: attempts.len(),
            last_start: last.start,
            last_end: last.end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_grow_by_step() {
        let windows = autoindex_windows(0, 10, 20, 1, 60);
        assert_eq!(windows.len(), 10);
        assert_eq!(windows[0], FrameRange::new(0, 10));
        assert_eq!(windows[9], FrameRange::new(0, 19));
    }

    #[test]
    fn test_windows_respect_step_bound() {
        let windows = autoindex_windows(5, 10, 21, 3, 100);
        assert_eq!(windows.len(), 4);
        assert_eq!(windows.last(), Some(&FrameRange::new(5, 24)));
    }

    #[test]
    fn test_windows_clamped_to_dataset() {
        let windows = autoindex_windows(0, 10, 20, 2, 13);
        assert_eq!(windows, [FrameRange::new(0, 10), FrameRange::new(0, 12), FrameRange::new(0, 13)]);
        assert!(autoindex_windows(20, 10, 20, 1, 13).is_empty());
    }

    #[test]
    fn test_accept_policy() {
        let reference = UnitCell::new([10.0, 10.0, 10.0], [90.0; 3], "P 1");
        let solutions = vec![
            IndexSolution {
                cell: UnitCell::new([10.0, 10.0, 20.0], [90.0; 3], "P 1"),
                quality: 0.99,
            },
            IndexSolution {
                cell: UnitCell::new([10.3, 10.0, 10.0], [90.0; 3], "P 1"),
                quality: 0.7,
            },
            IndexSolution {
                cell: UnitCell::new([10.1, 10.0, 10.0], [90.0; 3], "P 1"),
                quality: 0.9,
            },
        ];
        let first = AcceptPolicy::First.select(&solutions, &reference, 0.5, 0.1).unwrap();
        assert_eq!(first.quality, 0.7);
        let best = AcceptPolicy::Best.select(&solutions, &reference, 0.5, 0.1).unwrap();
        assert_eq!(best.quality, 0.9);
        assert!(AcceptPolicy::First.select(&solutions, &reference, 0.05, 0.1).is_none());
        assert!("greedy".parse::<AcceptPolicy>().is_err());
    }
}
