//! Per-call session state

use podrelay_proto::{SessionPhase, WorkloadHandle};
use tracing::{debug, warn};
use uuid::Uuid;

/// State of one forward call. Owned by that call alone.
#[derive(Debug)]
pub(crate) struct Session {
    id: Uuid,
    phase: SessionPhase,
    workload: Option<WorkloadHandle>,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            phase: SessionPhase::Unscheduled,
            workload: None,
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub(crate) fn workload(&self) -> Option<&WorkloadHandle> {
        self.workload.as_ref()
    }

    pub(crate) fn bind_workload(&mut self, handle: WorkloadHandle) {
        self.workload = Some(handle);
    }

    /// Move to `next` if the transition is legal. Illegal transitions are
    /// logged and ignored.
    pub(crate) fn advance(&mut self, next: SessionPhase) -> bool {
        if !self.phase.can_advance_to(next) {
            warn!(from = %self.phase, to = %next, "Ignoring illegal session transition");
            return false;
        }
        debug!(from = %self.phase, to = %next, "Session phase changed");
        self.phase = next;
        true
    }

    pub(crate) fn fail(&mut self) -> bool {
        self.advance(SessionPhase::Failed)
    }
}
