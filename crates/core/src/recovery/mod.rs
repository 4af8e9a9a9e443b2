//!
//! # Recovery Sweep
//!
//! A periodic job that finds sagas stuck in a non-terminal status past a
//! staleness threshold and submits each through the engine's `resume` with
//! `is_recovery = true`, driving them into the query-first resuming
//! handlers.
//!
//! The sweep runs on the caller's task (`run`) or can be driven manually
//! (`run_once`, which the tests use). Per-saga locks keep a sweep from
//! racing a live callback for the same saga.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::engine::{ResumeSagaCommand, SagaEngine};
use crate::status::SagaStatus;

/// Sweep configuration.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// How often to scan for stuck sagas.
    pub poll_interval: Duration,
    /// A saga is stuck when its `updated_at` is older than this.
    pub staleness: chrono::Duration,
    /// Maximum sagas resumed per sweep.
    pub batch_limit: usize,
    /// Statuses considered recoverable.
    pub statuses: Vec<SagaStatus>,
    /// Tag recorded as the resume source.
    pub source: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            staleness: chrono::Duration::minutes(5),
            batch_limit: 50,
            statuses: vec![
                SagaStatus::Processing,
                SagaStatus::Pending,
                SagaStatus::Resuming,
                SagaStatus::RecoveryProcessing,
                SagaStatus::Reverting,
                SagaStatus::RevertingPending,
                SagaStatus::ResumingReverting,
                SagaStatus::RecoveryReverting,
            ],
            source: "recovery-sweep".to_string(),
        }
    }
}

impl RecoveryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_staleness(mut self, staleness: chrono::Duration) -> Self {
        self.staleness = staleness;
        self
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn with_statuses(mut self, statuses: Vec<SagaStatus>) -> Self {
        self.statuses = statuses;
        self
    }
}

/// The sweep job.
pub struct RecoverySweeper {
    engine: Arc<SagaEngine>,
    config: RecoveryConfig,
    running: Arc<AtomicBool>,
}

impl RecoverySweeper {
    pub fn new(engine: Arc<SagaEngine>, config: RecoveryConfig) -> Self {
        Self {
            engine,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// One sweep: scan for stuck sagas and resume each. Returns the number
    /// of sagas submitted.
    pub async fn run_once(&self) -> usize {
        let stuck = match self
            .engine
            .query_stuck(&self.config.statuses, self.config.staleness, self.config.batch_limit)
            .await
        {
            Ok(stuck) => stuck,
            Err(err) => {
                tracing::error!(error = %err, "stuck-saga scan failed");
                return 0;
            }
        };

        if stuck.is_empty() {
            return 0;
        }
        tracing::info!(count = stuck.len(), "recovering stuck sagas");

        let mut recovered = 0;
        for ctx in stuck {
            let order_id = ctx.order_id();
            match self
                .engine
                .resume(ResumeSagaCommand::recovery(order_id, self.config.source.clone()))
                .await
            {
                Ok(resumed) => {
                    tracing::info!(order_id, status = %resumed.status(), "saga recovered");
                    recovered += 1;
                }
                Err(err) => {
                    tracing::error!(order_id, error = %err, "saga recovery failed");
                }
            }
        }
        recovered
    }

    /// Run sweeps on the current task until [`stop`](Self::stop) is called.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.run_once().await;
        }
        tracing::info!("recovery sweep stopped");
    }

    /// Signal the sweep loop to stop after the current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
