//! Classified outcomes of a run and their summary numbers.

use serde::Serialize;

use crate::outcome::{CheckOutcome, Classification};

/// Counts over a [`ResultSet`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stats {
    /// Outcomes recorded.
    pub total: usize,
    /// Decisively available.
    pub available: usize,
    /// Decisively taken.
    pub unavailable: usize,
    /// Invalid or failed.
    pub errors: usize,
    /// Share of decisive outcomes, in percent. Zero for an empty set.
    pub success_rate: f64,
}

/// Outcomes split into three disjoint buckets.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    available: Vec<CheckOutcome>,
    unavailable: Vec<CheckOutcome>,
    errors: Vec<CheckOutcome>,
}

impl ResultSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// File an outcome under its classification.
    pub fn record(&mut self, outcome: CheckOutcome) {
        match outcome.classification() {
            Classification::Available => self.available.push(outcome),
            Classification::Unavailable => self.unavailable.push(outcome),
            Classification::Error => self.errors.push(outcome),
        }
    }

    /// Available outcomes, in arrival order.
    #[must_use]
    pub fn available(&self) -> &[CheckOutcome] {
        &self.available
    }

    /// Taken outcomes, in arrival order.
    #[must_use]
    pub fn unavailable(&self) -> &[CheckOutcome] {
        &self.unavailable
    }

    /// Invalid or failed outcomes, in arrival order.
    #[must_use]
    pub fn errors(&self) -> &[CheckOutcome] {
        &self.errors
    }

    /// Every outcome: available, then unavailable, then errors.
    pub fn iter(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.available
            .iter()
            .chain(&self.unavailable)
            .chain(&self.errors)
    }

    /// Number of outcomes recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.available.len() + self.unavailable.len() + self.errors.len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summary counts.
    #[must_use]
    pub fn stats(&self) -> Stats {
        let total = self.len();
        let decisive = self.available.len() + self.unavailable.len();
        let success_rate = if total == 0 {
            0.0
        } else {
            decisive as f64 / total as f64 * 100.0
        };
        Stats {
            total,
            available: self.available.len(),
            unavailable: self.unavailable.len(),
            errors: self.errors.len(),
            success_rate,
        }
    }

    /// Forget every outcome.
    pub fn reset(&mut self) {
        self.available.clear();
        self.unavailable.clear();
        self.errors.clear();
    }
}

impl Extend<CheckOutcome> for ResultSet {
    fn extend<T: IntoIterator<Item = CheckOutcome>>(&mut self, iter: T) {
        for outcome in iter {
            self.record(outcome);
        }
    }
}
