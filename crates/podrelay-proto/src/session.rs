//! Session phase

use std::fmt;

/// Where a forwarding session is in its lifecycle.
///
/// Phases advance in declaration order. `Closed` and `Failed` are terminal;
/// `Failed` can be entered from any non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionPhase {
    Unscheduled,
    Provisioning,
    Running,
    Forwarding,
    Closed,
    Failed,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_advance_to(self, next: SessionPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed => true,
            Self::Closed => self == Self::Forwarding,
            _ => next > self,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
