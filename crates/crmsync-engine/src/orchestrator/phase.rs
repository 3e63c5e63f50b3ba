use std::fmt;

/// Where the orchestrator is in the per-record flow.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Authenticating,
    Navigating,
    Searching,
    Editing,
    Updating {
        field: String,
    },
    Saving,
    /// Re-entering the flow from `Navigating` after a transient fault.
    Retrying {
        attempt: usize,
    },
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => f.write_str("idle"),
            Phase::Authenticating => f.write_str("authenticating"),
            Phase::Navigating => f.write_str("navigating"),
            Phase::Searching => f.write_str("searching"),
            Phase::Editing => f.write_str("editing"),
            Phase::Updating { field } => write!(f, "updating({})", field),
            Phase::Saving => f.write_str("saving"),
            Phase::Retrying { attempt } => write!(f, "retrying(attempt {})", attempt),
            Phase::Done => f.write_str("done"),
            Phase::Failed => f.write_str("failed"),
        }
    }
}

/// Best guess of what the browser is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageHint {
    #[default]
    Unknown,
    Login,
    Module,
    Listing,
    Record,
    EditForm,
}
