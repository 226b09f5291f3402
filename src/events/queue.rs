use super::Event;

/// Ordered, request-scoped buffer of events.
///
/// Owned by exactly one unit of work. It has no durability of its own: the coordinator drains
/// it only after the owning transaction commits and drops it on rollback.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Take every buffered event in enqueue order, leaving the queue empty
    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
