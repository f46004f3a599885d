//! Change notifications emitted by the session controller.
//!
//! Presentation layers attach a [`SessionObserver`]; the controller itself
//! never assumes a particular UI binding.

use crate::SetRef;
use std::cell::RefCell;
use std::rc::Rc;
use uuid::Uuid;

/// Status of the last health-service sync
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum HealthSyncStatus {
    #[default]
    Idle,
    Syncing,
    Success,
    Failed(String),
}

/// Something observable changed in the live session
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    SessionStarted { session_id: Uuid },
    SetCompleted { set: SetRef },
    SetUncompleted { set: SetRef },
    SetUpdated { set: SetRef },
    SetAdded { set: SetRef },
    SetRemoved { set: SetRef },
    ExerciseAdded { exercise_id: Uuid },
    ExerciseRemoved { exercise_id: Uuid },
    RestTimeChanged { exercise_id: Uuid, rest_seconds: u32 },
    /// The set the UI should focus next
    CurrentSetChanged { set: Option<SetRef> },
    RestStarted { seconds: u32 },
    RestTick { remaining_seconds: u32 },
    RestFinished,
    RestStopped,
    WorkoutTick { elapsed_seconds: i64 },
    /// Every set is done; the user should be offered to finish
    WorkoutReadyToFinish,
    SessionPaused,
    SessionResumed,
    SessionCompleted { session_id: Uuid },
    SessionCancelled { session_id: Uuid },
    HealthSync(HealthSyncStatus),
}

/// Receives session change notifications
pub trait SessionObserver {
    fn on_event(&mut self, event: &SessionEvent);
}

/// Observer that keeps every event, for tests and simple hosts
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: Rc<RefCell<Vec<SessionEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.borrow().clone()
    }

    pub fn contains(&self, event: &SessionEvent) -> bool {
        self.events.borrow().iter().any(|e| e == event)
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl SessionObserver for EventLog {
    fn on_event(&mut self, event: &SessionEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}
