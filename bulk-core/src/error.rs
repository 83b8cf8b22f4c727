use crate::pause_gate::RunId;

#[derive(Debug)]
pub enum BatchError {
    InvalidRequest(String),
    Transport(String),
    Status { status: u16, body: String },
    Cancelled { run_id: RunId },
}

impl BatchError {
    /// True when the run stopped because a user cancelled it while paused.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BatchError::Cancelled { .. })
    }
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchError::InvalidRequest(message) => write!(f, "invalid batch request: {message}"),
            BatchError::Transport(message) => write!(f, "batch page request failed: {message}"),
            BatchError::Status { status, body } if body.trim().is_empty() => {
                write!(f, "admin api rejected batch page with status {status}")
            }
            BatchError::Status { status, body } => write!(
                f,
                "admin api rejected batch page with status {status}: {}",
                body.trim()
            ),
            BatchError::Cancelled { run_id } => write!(f, "batch run {run_id} was cancelled"),
        }
    }
}

impl std::error::Error for BatchError {}
