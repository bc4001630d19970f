use serde::{Deserialize, Serialize};

use crate::Instance;

/// Lifecycle event produced by the reconciliation engine.
///
/// Each variant carries an owned copy of the instance as observed when the
/// event fired; Terminated carries the pre-rotation flag so handlers can see
/// whether the instance matured before it went down.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum FleetEvent {
    Created(Instance),
    Started(Instance),
    Running(Instance),
    Terminated(Instance),
    Deleted(Instance),
}

impl FleetEvent {
    pub fn instance(&self) -> &Instance {
        match self {
            FleetEvent::Created(i)
            | FleetEvent::Started(i)
            | FleetEvent::Running(i)
            | FleetEvent::Terminated(i)
            | FleetEvent::Deleted(i) => i,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FleetEvent::Created(_) => "created",
            FleetEvent::Started(_) => "started",
            FleetEvent::Running(_) => "running",
            FleetEvent::Terminated(_) => "terminated",
            FleetEvent::Deleted(_) => "deleted",
        }
    }
}
