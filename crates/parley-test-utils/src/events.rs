use parking_lot::Mutex;
use parley_protocol::{EventSink, TurnEvent, TurnEventPayload};
use std::sync::Arc;

/// Event sink that keeps every emitted event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<TurnEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TurnEvent> {
        self.events.lock().clone()
    }

    pub fn payloads(&self) -> Vec<TurnEventPayload> {
        self.events
            .lock()
            .iter()
            .map(|event| event.payload.clone())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: TurnEvent) {
        self.events.lock().push(event);
    }
}
