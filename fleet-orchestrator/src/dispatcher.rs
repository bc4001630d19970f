use std::collections::VecDeque;
use std::sync::Mutex;

use fleet_common::events::FleetEvent;

/// FIFO queue between the reconcile pass and the event handlers.
#[derive(Default)]
pub struct Dispatcher {
    queue: Mutex<VecDeque<FleetEvent>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, events: impl IntoIterator<Item = FleetEvent>) {
        let mut queue = self.queue.lock().unwrap();
        queue.extend(events);
    }

    /// Take everything queued so far, preserving arrival order.
    pub fn drain(&self) -> Vec<FleetEvent> {
        self.queue.lock().unwrap().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
