//! Scheduler state and status types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::pool::CredentialUsage;
use crate::common::types::{BotId, CredentialId};

/// Lifecycle of one bot inside the scheduler
///
/// `Idle -> Queued -> Running -> Idle` on success,
/// `Running -> Failed` on failure (immediately eligible for re-queue).
/// `Disabled` is absorbing and only entered/exited by operator action or
/// the bot's own configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Idle,
    Queued,
    Running,
    Failed,
    Disabled,
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotStatus::Idle => write!(f, "idle"),
            BotStatus::Queued => write!(f, "queued"),
            BotStatus::Running => write!(f, "running"),
            BotStatus::Failed => write!(f, "failed"),
            BotStatus::Disabled => write!(f, "disabled"),
        }
    }
}

/// Per-bot run state, created on first evaluation request and never deleted
#[derive(Debug, Clone)]
pub struct BotRunState {
    pub bot_id: BotId,
    pub status: BotStatus,
    /// Credential reserved while Running
    pub credential: Option<CredentialId>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_result: Option<EvaluationOutcome>,
}

impl BotRunState {
    pub fn new(bot_id: impl Into<BotId>) -> Self {
        Self {
            bot_id: bot_id.into(),
            status: BotStatus::Idle,
            credential: None,
            started_at: None,
            last_result: None,
        }
    }
}

/// One queued evaluation; lives only inside the scheduler's queue
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub bot_id: BotId,
    pub enqueued_at: DateTime<Utc>,
    pub preferred_broker: Option<String>,
    /// Per-request deadline override; falls back to the configured default
    pub deadline: Option<Duration>,
}

/// Result of `request_evaluation`
///
/// `AlreadyQueuedOrRunning` is an idempotent no-op signal, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Accepted,
    AlreadyQueuedOrRunning(BotStatus),
    Disabled,
}

/// Final result of one evaluation cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    /// The worker ran to completion (including broker-rejected orders,
    /// which surface their reason in the summary)
    Completed(EvaluationSummary),
    /// The worker failed or panicked; reason normalized to a string
    Failed { reason: String },
    /// The scheduler's deadline elapsed; the worker was abandoned
    TimedOut,
}

impl EvaluationOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        EvaluationOutcome::Failed {
            reason: reason.into(),
        }
    }
}

/// Operator-facing one-liner for each outcome
impl std::fmt::Display for EvaluationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluationOutcome::Completed(summary) => write!(f, "{}", summary.decision),
            EvaluationOutcome::Failed { reason } => write!(f, "evaluation failed: {}", reason),
            EvaluationOutcome::TimedOut => {
                write!(f, "evaluation did not complete in time, will retry on next cycle")
            }
        }
    }
}

/// Summary recorded after a completed evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub symbol: String,
    /// Human-readable decision line ("hold", "opened BUY 0.01", "rejected: ...")
    pub decision: String,
    pub order_reference: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

/// Consistent point-in-time view of the scheduler
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running_bots: Vec<BotId>,
    pub queued_bots: Vec<BotId>,
    pub credential_usage: BTreeMap<CredentialId, CredentialUsage>,
    pub can_accept_new_bot: bool,
    /// Number of emergency resets since startup; a rising counter signals
    /// a latent concurrency bug, not normal operation
    pub emergency_resets: u64,
}
