//! The event publishing seam.
//!
//! Publishing is fire-and-forget from the scheduler's point of view: no
//! acknowledgement is needed for correctness, so [`EventPublisher::publish`]
//! is synchronous and infallible. Implementations that talk to a network
//! spawn the send and log failures.

use std::sync::Mutex;

use agora_types::SimEvent;
use tracing::{debug, warn};

/// Sink for simulation events.
pub trait EventPublisher: Send + Sync {
    /// Publish `payload` on `topic`.
    fn publish(&self, topic: &str, payload: Vec<u8>);
}

/// Serialise `event` and publish it on its topic.
pub fn publish_event(publisher: &dyn EventPublisher, event: &SimEvent) {
    match event.to_payload() {
        Ok(payload) => publisher.publish(&event.topic(), payload),
        Err(e) => warn!(error = %e, topic = %event.topic(), "failed to serialise event"),
    }
}

/// Writes every event to the log at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPublisher;

impl EventPublisher for TracingPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) {
        debug!(topic, bytes = payload.len(), "event published");
    }
}

/// Keeps every published event in memory, for tests.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingPublisher {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Topics published so far, in order.
    pub fn topics(&self) -> Vec<String> {
        self.with_published(|p| p.iter().map(|(topic, _)| topic.clone()).collect())
    }

    /// Events published so far, decoded, in order.
    pub fn events(&self) -> Vec<SimEvent> {
        self.with_published(|p| {
            p.iter()
                .filter_map(|(_, payload)| serde_json::from_slice(payload).ok())
                .collect()
        })
    }

    fn with_published<T>(&self, f: impl FnOnce(&Vec<(String, Vec<u8>)>) -> T) -> T {
        let guard = match self.published.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&guard)
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) {
        let mut guard = match self.published.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push((topic.to_owned(), payload));
    }
}

#[cfg(test)]
mod tests {
    use agora_types::{AgentId, SimulationId};

    use super::*;

    #[test]
    fn recorder_keeps_order() {
        let recorder = RecordingPublisher::new();
        let simulation_id = SimulationId::new();
        let died = SimEvent::AgentDied {
            simulation_id,
            agent_id: AgentId::new(),
            tick: 1,
        };
        let tick = SimEvent::TickCompleted {
            simulation_id,
            tick: 1,
            agents: Vec::new(),
        };
        publish_event(&recorder, &died);
        publish_event(&recorder, &tick);
        assert_eq!(recorder.events(), vec![died.clone(), tick.clone()]);
        assert_eq!(recorder.topics(), vec![died.topic(), tick.topic()]);
    }
}
