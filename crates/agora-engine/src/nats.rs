//! NATS-backed event publisher and agent policy.
//!
//! # Subject Convention
//!
//! - **Events:** the topic of each [`SimEvent`](agora_types::SimEvent), e.g.
//!   `simulation.{id}.agent.{agent_id}.moved`.
//! - **Decisions:** `simulation.{id}.agent.{agent_id}.decide`. The engine
//!   sends the agent's [`Observation`] as a request and expects a JSON
//!   [`Action`] as the reply.

use std::time::Duration;

use agora_core::{AgentPolicy, EventPublisher, PolicyError};
use agora_types::{Action, AgentId, Observation, decide_topic};
use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::error::EngineError;

/// Connect to a NATS server.
pub async fn connect(url: &str) -> Result<async_nats::Client, EngineError> {
    async_nats::connect(url)
        .await
        .map_err(|e| EngineError::Nats {
            message: format!("failed to connect to NATS at {url}: {e}"),
        })
}

/// Publishes simulation events on NATS, fire-and-forget.
///
/// Each publish runs on its own task so a slow broker never stalls a tick.
/// Failures are logged and dropped.
#[derive(Debug, Clone)]
pub struct NatsPublisher {
    client: async_nats::Client,
}

impl NatsPublisher {
    /// Wrap a connected client.
    pub const fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

impl EventPublisher for NatsPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(topic, "no runtime available, event dropped");
            return;
        };
        let client = self.client.clone();
        let subject = topic.to_owned();
        runtime.spawn(async move {
            if let Err(e) = client.publish(subject.clone(), payload.into()).await {
                warn!(subject = subject, error = %e, "failed to publish event");
            }
        });
    }
}

/// Asks an external decision service for each agent's action.
///
/// A request that gets no reply within the deadline fails with
/// [`PolicyError::Timeout`]; the agent is skipped for that tick.
#[derive(Debug, Clone)]
pub struct NatsPolicy {
    client: async_nats::Client,
    timeout: Duration,
}

impl NatsPolicy {
    /// Wrap a connected client with a per-request deadline.
    pub const fn new(client: async_nats::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn request(&self, observation: &Observation) -> Result<Action, PolicyError> {
        let agent = &observation.agent;
        let subject = decide_topic(agent.simulation_id, agent.id);
        let payload = serde_json::to_vec(observation).map_err(|e| PolicyError::Transport {
            message: format!("failed to serialize observation for agent {}: {e}", agent.id),
        })?;

        let deadline_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        let reply = tokio::time::timeout(
            self.timeout,
            self.client.request(subject.clone(), payload.into()),
        )
        .await
        .map_err(|_elapsed| PolicyError::Timeout {
            agent_id: agent.id,
            deadline_ms,
        })?
        .map_err(|e| PolicyError::Transport {
            message: format!("request on {subject} failed: {e}"),
        })?;

        debug!(tick = observation.tick, agent_id = %agent.id, "Decision received");
        decode_action(agent.id, &reply.payload)
    }
}

impl AgentPolicy for NatsPolicy {
    fn decide<'a>(
        &'a self,
        observation: &'a Observation,
    ) -> BoxFuture<'a, Result<Action, PolicyError>> {
        Box::pin(self.request(observation))
    }
}

/// Parse a decision reply.
fn decode_action(agent_id: AgentId, payload: &[u8]) -> Result<Action, PolicyError> {
    serde_json::from_slice(payload).map_err(|e| PolicyError::InvalidResponse {
        message: format!("agent {agent_id}: {e}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn idle_reply_decodes() {
        let payload = serde_json::to_vec(&Action::Idle).unwrap();
        assert_eq!(decode_action(AgentId::new(), &payload).unwrap(), Action::Idle);
    }

    #[test]
    fn garbage_reply_is_invalid() {
        let err = decode_action(AgentId::new(), b"not json").err();
        assert!(matches!(err, Some(PolicyError::InvalidResponse { .. })));
    }
}
