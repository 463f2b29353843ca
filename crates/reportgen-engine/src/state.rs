use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of one report run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportState {
    /// Accepted, not yet validated
    Received,
    /// Sources are being fetched concurrently
    Fetching,
    /// Transforms and schema checks are running
    Processing,
    /// The template is being evaluated and encoded
    Rendering,
    /// The artifact exists and is being pushed to its sink
    Delivering,
    /// Artifact produced (delivery may still have failed)
    Completed,
    /// Terminated with exactly one error
    Failed,
}

impl ReportState {
    /// Check if this is a terminal state (no further transitions)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check if the run is doing work
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Fetching | Self::Processing | Self::Rendering | Self::Delivering
        )
    }

    /// Legal moves: the forward chain (delivery optional) plus any
    /// non-terminal state to `Failed`.
    pub fn can_transition_to(&self, next: ReportState) -> bool {
        use ReportState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Failed)
                | (Received, Fetching)
                | (Fetching, Processing)
                | (Processing, Rendering)
                | (Rendering, Delivering)
                | (Rendering, Completed)
                | (Delivering, Completed)
        )
    }
}

impl Default for ReportState {
    fn default() -> Self {
        Self::Received
    }
}

impl fmt::Display for ReportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Fetching => "fetching",
            Self::Processing => "processing",
            Self::Rendering => "rendering",
            Self::Delivering => "delivering",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for ReportState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "fetching" => Ok(Self::Fetching),
            "processing" => Ok(Self::Processing),
            "rendering" => Ok(Self::Rendering),
            "delivering" => Ok(Self::Delivering),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown report state: {s}")),
        }
    }
}
