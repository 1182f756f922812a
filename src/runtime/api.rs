//! Versioned wire messages exchanged with the transport layer.
//!
//! Every message travels inside an [`Envelope`] stamped with [`WIRE_VERSION`]; decoding
//! rejects envelopes from another version instead of guessing at their layout.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::core::{
    ActionId, ActionOutcome, ActionState, CompletionReport, CoreId, LaunchRequest,
    SchedulerResult, SchedulerStats, TaskScheduler,
};
use crate::core::error::AppResult;

/// Version of the envelope layout.
pub const WIRE_VERSION: u32 = 1;

/// Request to submit an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Core element to execute.
    pub core_id: CoreId,
    /// Scheduling priority (higher first).
    #[serde(default)]
    pub priority: i32,
    /// Actions whose outputs this one consumes.
    #[serde(default)]
    pub data_predecessors: Vec<ActionId>,
}

/// Completion reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMessage {
    /// Completed action.
    pub action: ActionId,
    /// How it ended.
    pub outcome: ActionOutcome,
    /// Measured execution time in milliseconds.
    pub measured_ms: u64,
}

/// Current status of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStatusResponse {
    /// Queried action.
    pub action: ActionId,
    /// State while live; `None` once terminal and dropped.
    pub state: Option<ActionState>,
    /// Hosting worker, if bound.
    pub worker: Option<String>,
}

/// Health payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Registered workers.
    pub workers: usize,
    /// Live actions.
    pub live_actions: usize,
    /// Current update id.
    pub update_id: u64,
    /// Counters.
    pub stats: SchedulerStats,
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum WireMessage {
    /// Submit an action.
    Submit(SubmitRequest),
    /// Action accepted.
    Submitted(ActionStatusResponse),
    /// Launch an action on a worker.
    Launch(LaunchRequest),
    /// Action completed.
    Completion(CompletionMessage),
    /// Effects of a completion.
    Completed(CompletionReport),
    /// Request rejected.
    Rejected {
        /// Rendered error.
        reason: String,
    },
}

/// Versioned message wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Layout version; always [`WIRE_VERSION`] when produced here.
    pub version: u32,
    /// Sender clock (ms since epoch).
    pub sent_at_ms: u64,
    /// Body.
    pub message: WireMessage,
}

impl Envelope {
    /// Wrap a message with the current version.
    #[must_use]
    pub const fn new(message: WireMessage, sent_at_ms: u64) -> Self {
        Self {
            version: WIRE_VERSION,
            sent_at_ms,
            message,
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Fails if serialization fails.
    pub fn encode(&self) -> AppResult<String> {
        serde_json::to_string(self).context("encoding envelope")
    }

    /// Parse JSON and check the version.
    ///
    /// # Errors
    ///
    /// Fails on malformed input or a version other than [`WIRE_VERSION`].
    pub fn decode(input: &str) -> AppResult<Self> {
        let envelope: Self = serde_json::from_str(input).context("decoding envelope")?;
        if envelope.version != WIRE_VERSION {
            bail!(
                "unsupported wire version {} (expected {WIRE_VERSION})",
                envelope.version
            );
        }
        Ok(envelope)
    }
}

/// Submit an action.
///
/// # Errors
///
/// Propagates submission errors.
pub fn submit_action(
    scheduler: &TaskScheduler,
    req: &SubmitRequest,
    now_ms: u64,
) -> SchedulerResult<ActionStatusResponse> {
    let action = scheduler.submit(req.core_id, req.priority, &req.data_predecessors, now_ms)?;
    Ok(action_status(scheduler, action))
}

/// Report a completion.
///
/// # Errors
///
/// Propagates completion errors.
pub fn complete_action(
    scheduler: &TaskScheduler,
    msg: &CompletionMessage,
    now_ms: u64,
) -> SchedulerResult<CompletionReport> {
    scheduler.notify_completion(msg.action, msg.outcome, msg.measured_ms, now_ms)
}

/// Status of an action.
#[must_use]
pub fn action_status(scheduler: &TaskScheduler, action: ActionId) -> ActionStatusResponse {
    ActionStatusResponse {
        action,
        state: scheduler.action_state(action),
        worker: scheduler
            .assignment(action)
            .ok()
            .flatten()
            .map(|a| a.worker),
    }
}

/// Answer an inbound envelope. Scheduler errors become [`WireMessage::Rejected`];
/// messages that only flow outbound get no reply.
pub fn handle_envelope(
    scheduler: &TaskScheduler,
    envelope: &Envelope,
    now_ms: u64,
) -> Option<Envelope> {
    let reply = match &envelope.message {
        WireMessage::Submit(req) => submit_action(scheduler, req, now_ms).map(WireMessage::Submitted),
        WireMessage::Completion(msg) => {
            complete_action(scheduler, msg, now_ms).map(WireMessage::Completed)
        }
        WireMessage::Submitted(_)
        | WireMessage::Launch(_)
        | WireMessage::Completed(_)
        | WireMessage::Rejected { .. } => return None,
    };
    let message = reply.unwrap_or_else(|e| WireMessage::Rejected {
        reason: e.to_string(),
    });
    Some(Envelope::new(message, now_ms))
}

/// Return a health payload.
#[must_use]
pub fn health(scheduler: &TaskScheduler) -> Health {
    Health {
        ok: true,
        workers: scheduler.worker_names().len(),
        live_actions: scheduler.live_actions(),
        update_id: scheduler.update_id(),
        stats: scheduler.stats(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_other_versions() {
        let mut envelope = Envelope::new(
            WireMessage::Rejected {
                reason: "x".into(),
            },
            5,
        );
        envelope.version = WIRE_VERSION + 1;
        let text = serde_json::to_string(&envelope).unwrap();
        let err = Envelope::decode(&text).unwrap_err();
        assert!(err.to_string().contains("unsupported wire version"));
    }

    #[test]
    fn submit_envelope_is_tagged() {
        let envelope = Envelope::new(
            WireMessage::Submit(SubmitRequest {
                core_id: 0,
                priority: 1,
                data_predecessors: vec![ActionId(3)],
            }),
            9,
        );
        let text = envelope.encode().unwrap();
        assert!(text.contains("\"type\":\"submit\""));
        assert_eq!(Envelope::decode(&text).unwrap(), envelope);
    }
}
