use crate::error::{ModelError, Result};

/// Immutable snapshot of a job's progress.
///
/// Construction validates the range: both counters must be non-negative and
/// `completed_items` may never exceed `total_items`. Updates replace the whole
/// value rather than mutating it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanProgress {
    completed_items: u64,
    total_items: u64,
    stage_name: String,
}

impl ScanProgress {
    pub fn new(
        completed_items: i64,
        total_items: i64,
        stage_name: impl Into<String>,
    ) -> Result<Self> {
        if completed_items < 0 || total_items < 0 {
            return Err(ModelError::InvalidProgress(format!(
                "negative progress values ({completed_items}/{total_items})"
            )));
        }
        if completed_items > total_items {
            return Err(ModelError::InvalidProgress(format!(
                "completed items {completed_items} exceed total {total_items}"
            )));
        }

        Ok(Self {
            completed_items: completed_items as u64,
            total_items: total_items as u64,
            stage_name: stage_name.into(),
        })
    }

    /// Progress at zero for a stage that has not processed anything yet.
    pub fn zero(stage_name: impl Into<String>) -> Self {
        Self {
            completed_items: 0,
            total_items: 0,
            stage_name: stage_name.into(),
        }
    }

    pub fn completed_items(&self) -> u64 {
        self.completed_items
    }

    pub fn total_items(&self) -> u64 {
        self.total_items
    }

    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    pub fn is_complete(&self) -> bool {
        self.completed_items == self.total_items
    }

    /// Fraction in `[0.0, 1.0]`; an empty stage counts as complete.
    pub fn ratio(&self) -> f64 {
        if self.total_items == 0 {
            1.0
        } else {
            self.completed_items as f64 / self.total_items as f64
        }
    }
}
