use serde::{Deserialize, Serialize};

use crate::QueueError;

/// Priority class of a job. Each class is served by its own queue channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    /// Served before everything else
    Critical = 1,

    /// Served once no critical work can be claimed
    High = 2,

    /// Default class
    Normal = 3,
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl JobPriority {
    /// All classes in dispatch order (critical first)
    pub fn all() -> &'static [JobPriority] {
        &[Self::Critical, Self::High, Self::Normal]
    }

    /// Numeric rank, 1 is served first
    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn from_rank(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Critical),
            2 => Some(Self::High),
            3 => Some(Self::Normal),
            _ => None,
        }
    }

    /// Zero-based slot for per-class arrays
    pub fn index(self) -> usize {
        self.rank() as usize - 1
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
        }
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for JobPriority {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            _ => Err(QueueError::InvalidPriority(s.to_string())),
        }
    }
}
