//! Bot evaluation scheduling
//!
//! Admission control in front of the credential pool: at most one
//! concurrent evaluation per bot, total concurrency bounded by pool
//! capacity, FIFO queuing when capacity is exhausted, and an emergency
//! reset escape hatch for operator-triggered recovery.

pub mod pool;
pub mod types;
pub mod worker;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, instrument, warn};

use crate::common::errors::{CoordinatorError, Result};
use crate::common::types::BotId;
use crate::config::types::SchedulerSettings;

pub use pool::{AcquireOutcome, CredentialLease, CredentialPool, CredentialUsage};
pub use types::{
    BotRunState, BotStatus, EvaluationOutcome, EvaluationRequest, EvaluationSummary,
    RequestOutcome, SchedulerStatus,
};
pub use worker::{
    BotConfig, BotRepository, DecisionAction, DecisionEngine, EvaluationContext,
    EvaluationWorker, InMemoryBotRepository, LiveEvaluationWorker, PassiveDecisionEngine,
    TradeDecision,
};

struct RunningTask {
    supervisor: JoinHandle<()>,
    worker: AbortHandle,
}

struct SchedulerState {
    bots: HashMap<BotId, BotRunState>,
    queue: VecDeque<EvaluationRequest>,
    running: HashMap<BotId, RunningTask>,
}

/// Admission-control scheduler for bot evaluations
pub struct EvaluationScheduler {
    state: Mutex<SchedulerState>,
    pool: Arc<CredentialPool>,
    repository: Arc<dyn BotRepository>,
    worker: Arc<dyn EvaluationWorker>,
    default_deadline: Duration,
    dispatch_interval: Duration,
    wake: Notify,
    shutdown: watch::Sender<bool>,
    emergency_resets: AtomicU64,
}

impl EvaluationScheduler {
    /// Create a scheduler; call [`start`](Self::start) to begin dispatching
    pub fn new(
        pool: Arc<CredentialPool>,
        repository: Arc<dyn BotRepository>,
        worker: Arc<dyn EvaluationWorker>,
        settings: &SchedulerSettings,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            state: Mutex::new(SchedulerState {
                bots: HashMap::new(),
                queue: VecDeque::new(),
                running: HashMap::new(),
            }),
            pool,
            repository,
            worker,
            default_deadline: Duration::from_secs(settings.evaluation_timeout_seconds),
            dispatch_interval: Duration::from_millis(settings.dispatch_interval_ms),
            wake: Notify::new(),
            shutdown,
            emergency_resets: AtomicU64::new(0),
        })
    }

    /// Spawn the dispatcher task
    ///
    /// Dispatch is event-driven: new requests and credential releases wake
    /// it, with a bounded interval timer as a safety net against missed
    /// wakeups. Never a spin loop.
    pub fn start(self: &Arc<Self>) {
        let scheduler = self.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            info!("evaluation dispatcher started");
            loop {
                scheduler.dispatch_ready().await;

                tokio::select! {
                    _ = scheduler.wake.notified() => {}
                    _ = scheduler.pool.release_event() => {}
                    _ = tokio::time::sleep(scheduler.dispatch_interval) => {}
                    _ = shutdown_rx.changed() => {
                        info!("evaluation dispatcher stopped");
                        break;
                    }
                }
            }
        });
    }

    /// Stop admitting new evaluations; running workers finish on their own
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Request an evaluation cycle for one bot
    ///
    /// Idempotent: a bot that is already Queued or Running is not enqueued
    /// again, the call just reports the existing state. The bot's config is
    /// read here (not at dispatch) so a disabled trading toggle moves the
    /// bot to Disabled immediately.
    #[instrument(skip(self))]
    pub async fn request_evaluation(&self, bot_id: &str) -> Result<RequestOutcome> {
        let config = self
            .repository
            .load_bot_config(bot_id)
            .await?
            .ok_or_else(|| CoordinatorError::BotNotFound(bot_id.to_string()))?;

        let mut state = self.state.lock().await;
        let bot = state
            .bots
            .entry(bot_id.to_string())
            .or_insert_with(|| BotRunState::new(bot_id));

        if !config.ai_trading_enabled {
            if bot.status != BotStatus::Disabled {
                info!(bot_id, "trading disabled in bot config, marking Disabled");
                bot.status = BotStatus::Disabled;
            }
            return Ok(RequestOutcome::Disabled);
        }

        match bot.status {
            BotStatus::Queued | BotStatus::Running => {
                debug!(bot_id, status = %bot.status, "evaluation already in progress");
                Ok(RequestOutcome::AlreadyQueuedOrRunning(bot.status))
            }
            BotStatus::Disabled => {
                // The bot's own configuration re-enables it
                bot.status = BotStatus::Queued;
                state.queue.push_back(EvaluationRequest {
                    bot_id: bot_id.to_string(),
                    enqueued_at: chrono::Utc::now(),
                    preferred_broker: config.preferred_broker,
                    deadline: None,
                });
                drop(state);
                self.wake.notify_one();
                Ok(RequestOutcome::Accepted)
            }
            BotStatus::Idle | BotStatus::Failed => {
                bot.status = BotStatus::Queued;
                state.queue.push_back(EvaluationRequest {
                    bot_id: bot_id.to_string(),
                    enqueued_at: chrono::Utc::now(),
                    preferred_broker: config.preferred_broker,
                    deadline: None,
                });
                drop(state);
                self.wake.notify_one();
                Ok(RequestOutcome::Accepted)
            }
        }
    }

    /// Admit queued bots while credentials have capacity
    ///
    /// FIFO: on `Busy` the head request stays put and admission stops until
    /// the next release event.
    async fn dispatch_ready(self: &Arc<Self>) {
        loop {
            let mut state = self.state.lock().await;

            let request = match state.queue.front() {
                Some(request) => request.clone(),
                None => break,
            };

            // A reset or disable may have outrun the queue entry
            let still_queued = state
                .bots
                .get(&request.bot_id)
                .map(|b| b.status == BotStatus::Queued)
                .unwrap_or(false);
            if !still_queued {
                state.queue.pop_front();
                continue;
            }

            let lease = match self.pool.acquire(request.preferred_broker.as_deref()).await {
                AcquireOutcome::Acquired(lease) => lease,
                AcquireOutcome::Busy => break,
            };

            state.queue.pop_front();
            if let Some(bot) = state.bots.get_mut(&request.bot_id) {
                bot.status = BotStatus::Running;
                bot.credential = Some(lease.credential_id.clone());
                bot.started_at = Some(chrono::Utc::now());
            }

            let deadline = request.deadline.unwrap_or(self.default_deadline);
            let task = self.spawn_supervised(&request.bot_id, lease, deadline);
            state.running.insert(request.bot_id.clone(), task);
            info!(bot_id = %request.bot_id, "evaluation admitted");
        }
    }

    /// Run the worker as its own task, raced against the deadline
    ///
    /// The deadline is enforced here, not in the worker: on expiry the
    /// worker task is aborted and its result, if any, discarded. A worker
    /// panic surfaces as a JoinError and becomes a Failed outcome, so a
    /// reservation can never leak through a throwing worker.
    fn spawn_supervised(
        self: &Arc<Self>,
        bot_id: &str,
        lease: CredentialLease,
        deadline: Duration,
    ) -> RunningTask {
        let worker = self.worker.clone();
        let worker_bot_id = bot_id.to_string();
        let mut worker_task =
            tokio::spawn(async move { worker.evaluate(&worker_bot_id, &lease).await });
        let worker_abort = worker_task.abort_handle();

        let scheduler = self.clone();
        let bot_id = bot_id.to_string();
        let supervisor = tokio::spawn(async move {
            let outcome = tokio::select! {
                result = &mut worker_task => match result {
                    Ok(Ok(summary)) => EvaluationOutcome::Completed(summary),
                    Ok(Err(e)) => EvaluationOutcome::failed(e.to_string()),
                    Err(join_err) => {
                        EvaluationOutcome::failed(format!("worker crashed: {}", join_err))
                    }
                },
                _ = tokio::time::sleep(deadline) => {
                    warn!(bot_id, deadline_secs = deadline.as_secs(), "evaluation deadline elapsed, abandoning worker");
                    worker_task.abort();
                    EvaluationOutcome::TimedOut
                }
            };

            scheduler.on_evaluation_complete(&bot_id, outcome).await;
        });

        RunningTask {
            supervisor,
            worker: worker_abort,
        }
    }

    /// Record an evaluation result and free its credential
    ///
    /// Release and state transition happen under one lock: there is no
    /// window where a bot is Running without a reservation or vice versa.
    /// Stale completions (after a reset) are absorbed with a warning.
    pub async fn on_evaluation_complete(&self, bot_id: &str, outcome: EvaluationOutcome) {
        {
            let mut state = self.state.lock().await;
            let state = &mut *state;

            let bot = match state.bots.get_mut(bot_id) {
                Some(bot) => bot,
                None => {
                    warn!(bot_id, "completion for unknown bot, absorbing");
                    return;
                }
            };
            if bot.status != BotStatus::Running {
                warn!(bot_id, status = %bot.status, "stale completion for non-running bot, absorbing");
                return;
            }

            if let Some(credential) = bot.credential.take() {
                self.pool.release(&credential).await;
            } else {
                warn!(bot_id, "running bot had no credential reservation");
            }

            bot.status = match &outcome {
                EvaluationOutcome::Completed(_) => BotStatus::Idle,
                _ => BotStatus::Failed,
            };
            bot.started_at = None;
            bot.last_result = Some(outcome.clone());
            state.running.remove(bot_id);

            info!(bot_id, status = %bot.status, outcome = %outcome, "evaluation complete");
        }

        if let Err(e) = self.repository.save_evaluation_result(bot_id, &outcome).await {
            warn!(bot_id, error = %e, "failed to persist evaluation result");
        }

        self.wake.notify_one();
    }

    /// Consistent snapshot of scheduler and pool state
    pub async fn get_status(&self) -> SchedulerStatus {
        let state = self.state.lock().await;

        let running_bots = state
            .bots
            .values()
            .filter(|b| b.status == BotStatus::Running)
            .map(|b| b.bot_id.clone())
            .collect();
        let queued_bots = state.queue.iter().map(|r| r.bot_id.clone()).collect();

        // Pool snapshot taken while holding the state lock so callers never
        // observe a torn view across the two managers.
        let credential_usage = self.pool.snapshot().await;
        let can_accept_new_bot = credential_usage.values().any(|u| u.in_use < u.max);

        SchedulerStatus {
            running_bots,
            queued_bots,
            credential_usage,
            can_accept_new_bot,
            emergency_resets: self.emergency_resets.load(Ordering::SeqCst),
        }
    }

    /// Run state of one bot, if known
    pub async fn bot_state(&self, bot_id: &str) -> Option<BotRunState> {
        self.state.lock().await.bots.get(bot_id).cloned()
    }

    /// Blunt recovery for stuck state: abort everything, clear the queue,
    /// zero the pool
    ///
    /// Callable safely from any state and never fails. Disabled bots keep
    /// their status since that is operator configuration, not run state. The
    /// reason is logged and counted; repeated resets point at a latent
    /// concurrency bug rather than normal operation.
    pub async fn emergency_reset(&self, reason: &str) {
        {
            let mut state = self.state.lock().await;

            for (_, task) in state.running.drain() {
                task.worker.abort();
                task.supervisor.abort();
            }
            state.queue.clear();

            for bot in state.bots.values_mut() {
                if bot.status != BotStatus::Disabled {
                    bot.status = BotStatus::Idle;
                    bot.credential = None;
                    bot.started_at = None;
                }
            }
        }

        self.pool.reset_all().await;

        let resets = self.emergency_resets.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(reason, resets, "emergency reset executed");
        self.wake.notify_one();
    }

    /// Operator toggle into/out of the absorbing Disabled state
    ///
    /// Disabling a bot removes it from the queue and aborts a running
    /// evaluation, releasing its credential.
    #[instrument(skip(self))]
    pub async fn set_enabled(&self, bot_id: &str, enabled: bool) {
        let mut state = self.state.lock().await;

        if enabled {
            let bot = state
                .bots
                .entry(bot_id.to_string())
                .or_insert_with(|| BotRunState::new(bot_id));
            if bot.status == BotStatus::Disabled {
                bot.status = BotStatus::Idle;
                info!(bot_id, "bot re-enabled");
            }
            return;
        }

        state.queue.retain(|r| r.bot_id != bot_id);
        if let Some(task) = state.running.remove(bot_id) {
            task.worker.abort();
            task.supervisor.abort();
        }

        let bot = state
            .bots
            .entry(bot_id.to_string())
            .or_insert_with(|| BotRunState::new(bot_id));
        if let Some(credential) = bot.credential.take() {
            self.pool.release(&credential).await;
        }
        bot.status = BotStatus::Disabled;
        bot.started_at = None;
        info!(bot_id, "bot disabled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use crate::common::types::Resolution;
    use crate::config::types::CredentialConfig;

    struct InstantWorker;

    #[async_trait]
    impl EvaluationWorker for InstantWorker {
        async fn evaluate(
            &self,
            _bot_id: &str,
            _lease: &CredentialLease,
        ) -> Result<EvaluationSummary> {
            Ok(EvaluationSummary {
                symbol: "BTC/USD".to_string(),
                decision: "hold".to_string(),
                order_reference: None,
                evaluated_at: chrono::Utc::now(),
            })
        }
    }

    fn credential(id: &str) -> CredentialConfig {
        CredentialConfig {
            id: id.to_string(),
            broker: "capital".to_string(),
            api_key: "key".to_string(),
            identifier: "user".to_string(),
            password: "pass".to_string(),
            demo: true,
            max_sessions: 1,
        }
    }

    fn bot(id: &str, enabled: bool) -> BotConfig {
        BotConfig {
            id: id.to_string(),
            name: format!("bot {}", id),
            symbol: "BTC/USD".to_string(),
            resolution: Resolution::Minute,
            preferred_broker: None,
            ai_trading_enabled: enabled,
            deal_size: dec!(0.01),
        }
    }

    async fn scheduler_with_bots(
        bots: Vec<BotConfig>,
    ) -> (Arc<EvaluationScheduler>, Arc<InMemoryBotRepository>) {
        let pool = Arc::new(CredentialPool::new(&[credential("cred-1")]));
        let repository = Arc::new(InMemoryBotRepository::new());
        for config in bots {
            repository.insert_bot(config).await;
        }
        let scheduler = EvaluationScheduler::new(
            pool,
            repository.clone(),
            Arc::new(InstantWorker),
            &SchedulerSettings::default(),
        );
        (scheduler, repository)
    }

    #[tokio::test]
    async fn test_request_is_idempotent_while_queued() {
        let (scheduler, _) = scheduler_with_bots(vec![bot("bot-1", true)]).await;

        // Dispatcher not started: the request stays Queued
        let first = scheduler.request_evaluation("bot-1").await.unwrap();
        assert_eq!(first, RequestOutcome::Accepted);

        let second = scheduler.request_evaluation("bot-1").await.unwrap();
        assert_eq!(
            second,
            RequestOutcome::AlreadyQueuedOrRunning(BotStatus::Queued)
        );

        let status = scheduler.get_status().await;
        assert_eq!(status.queued_bots, vec!["bot-1".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_bot_is_an_error() {
        let (scheduler, _) = scheduler_with_bots(vec![]).await;
        let result = scheduler.request_evaluation("ghost").await;
        assert!(matches!(result, Err(CoordinatorError::BotNotFound(_))));
    }

    #[tokio::test]
    async fn test_config_toggle_disables_bot() {
        let (scheduler, _) = scheduler_with_bots(vec![bot("bot-1", false)]).await;

        let outcome = scheduler.request_evaluation("bot-1").await.unwrap();
        assert_eq!(outcome, RequestOutcome::Disabled);

        let state = scheduler.bot_state("bot-1").await.unwrap();
        assert_eq!(state.status, BotStatus::Disabled);
    }

    #[tokio::test]
    async fn test_set_enabled_removes_from_queue() {
        let (scheduler, _) = scheduler_with_bots(vec![bot("bot-1", true)]).await;

        scheduler.request_evaluation("bot-1").await.unwrap();
        scheduler.set_enabled("bot-1", false).await;

        let status = scheduler.get_status().await;
        assert!(status.queued_bots.is_empty());
        assert_eq!(
            scheduler.bot_state("bot-1").await.unwrap().status,
            BotStatus::Disabled
        );

        // The bot's own config still says enabled, so a new request re-queues it
        let outcome = scheduler.request_evaluation("bot-1").await.unwrap();
        assert_eq!(outcome, RequestOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_emergency_reset_from_queued_state() {
        let (scheduler, _) =
            scheduler_with_bots(vec![bot("bot-1", true), bot("bot-2", true)]).await;

        scheduler.request_evaluation("bot-1").await.unwrap();
        scheduler.request_evaluation("bot-2").await.unwrap();

        scheduler.emergency_reset("unit test").await;

        let status = scheduler.get_status().await;
        assert!(status.running_bots.is_empty());
        assert!(status.queued_bots.is_empty());
        assert!(status.credential_usage.values().all(|u| u.in_use == 0));
        assert_eq!(status.emergency_resets, 1);
    }
}
