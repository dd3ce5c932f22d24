//! Identity and observed status of a relay workload

use std::fmt;

/// A relay workload the control plane has accepted.
///
/// The name is generated server-side, so a handle only exists after a
/// successful create call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadHandle {
    pub name: String,
    pub namespace: String,
}

impl WorkloadHandle {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for WorkloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Coarse workload status used by the readiness and liveness polls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadStatus {
    Pending,
    Running,
    Failed,
    Succeeded,
}

impl WorkloadStatus {
    /// Map a Kubernetes pod phase. `Unknown` and a missing phase count as pending.
    pub fn from_phase(phase: Option<&str>) -> Self {
        match phase {
            Some("Running") => Self::Running,
            Some("Failed") => Self::Failed,
            Some("Succeeded") => Self::Succeeded,
            _ => Self::Pending,
        }
    }

    /// The workload has exited and will never become runnable again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Succeeded)
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Failed => "Failed",
            Self::Succeeded => "Succeeded",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_phase() {
        assert_eq!(WorkloadStatus::from_phase(Some("Running")), WorkloadStatus::Running);
        assert_eq!(WorkloadStatus::from_phase(Some("Failed")), WorkloadStatus::Failed);
        assert_eq!(
            WorkloadStatus::from_phase(Some("Succeeded")),
            WorkloadStatus::Succeeded
        );
        assert_eq!(WorkloadStatus::from_phase(Some("Unknown")), WorkloadStatus::Pending);
        assert_eq!(WorkloadStatus::from_phase(None), WorkloadStatus::Pending);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(WorkloadStatus::Failed.is_terminal());
        assert!(WorkloadStatus::Succeeded.is_terminal());
        assert!(!WorkloadStatus::Running.is_terminal());
        assert!(!WorkloadStatus::Pending.is_terminal());
    }

    #[test]
    fn test_handle_display() {
        let handle = WorkloadHandle::new("port-forward-remote-x7k2p", "default");
        assert_eq!(handle.to_string(), "default/port-forward-remote-x7k2p");
    }
}
