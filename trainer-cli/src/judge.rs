//! Pass/fail policy for an exercise.
//!
//! The core only reports what it hears. Deciding whether that matches what the
//! learner was asked to play is the host's job, and lives here.

use trainer_core::DetectionEvent;
use trainer_core::tuning::normalize_chord_label;

pub const DEFAULT_REQUIRED_MATCHES: usize = 3;

/// Outcome of feeding one event to the judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not there yet; carries the current streak.
    Pending(usize),
    Success,
}

/// Succeeds once the expected label has been reported on enough consecutive
/// events. Any other label, or an empty event, restarts the count.
#[derive(Debug, Clone)]
pub struct ExerciseJudge {
    expected: String,
    required_consecutive: usize,
    streak: usize,
    succeeded: bool,
}

impl ExerciseJudge {
    /// # Arguments
    /// * `expected` - Pitch class or chord name in any spelling (`Bb`, `ebm`, `C#7`)
    /// * `required_consecutive` - Matching events needed, at least 1
    ///
    /// # Returns
    /// * `None` - `expected` does not start with a note name
    pub fn new(expected: &str, required_consecutive: usize) -> Option<Self> {
        Some(Self {
            expected: normalize_chord_label(expected)?,
            required_consecutive: required_consecutive.max(1),
            streak: 0,
            succeeded: false,
        })
    }

    pub fn expected(&self) -> &str {
        &self.expected
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn observe(&mut self, event: &DetectionEvent) -> Verdict {
        if self.succeeded {
            return Verdict::Success;
        }

        let matches = event
            .label
            .as_deref()
            .and_then(normalize_chord_label)
            .is_some_and(|label| label == self.expected);

        if matches {
            self.streak += 1;
        } else {
            self.streak = 0;
        }

        if self.streak >= self.required_consecutive {
            self.succeeded = true;
            Verdict::Success
        } else {
            Verdict::Pending(self.streak)
        }
    }

    pub fn reset(&mut self) {
        self.streak = 0;
        self.succeeded = false;
    }
}
