use std::fmt;

/// Lifecycle of a job node inside one scan run.
///
/// `Pending -> Running -> {Completed, Canceled, Failed}`. A node that is
/// canceled before its payload starts goes straight from `Pending` to
/// `Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum JobStatus {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Canceled = 3,
    Failed = 4,
}

impl JobStatus {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`JobStatus::as_u8`]. Unknown values map to `None`.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(JobStatus::Pending),
            1 => Some(JobStatus::Running),
            2 => Some(JobStatus::Completed),
            3 => Some(JobStatus::Canceled),
            4 => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Canceled | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Canceled => write!(f, "canceled"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}
