//! Scheduled pruning of token tables
//!
//! Two independent cron jobs remove expired refresh tokens and expired
//! revocations. A failing run is logged and retried at the next tick; it
//! never affects the other job or the server.

use chrono::Utc;
use shopauth_core::{CleanupConfig, StoreError};
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

use super::refresh::RefreshTokenStore;
use super::revocation::RevocationRegistry;

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("Invalid schedule '{expression}': {message}")]
    InvalidSchedule { expression: String, message: String },

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

/// Records removed by one run of both jobs. `None` marks a failed job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub refresh_tokens_removed: Option<u64>,
    pub revoked_tokens_removed: Option<u64>,
}

#[derive(Clone)]
pub struct CleanupScheduler {
    refresh_tokens: RefreshTokenStore,
    revocations: RevocationRegistry,
    config: CleanupConfig,
}

impl CleanupScheduler {
    pub fn new(
        refresh_tokens: RefreshTokenStore,
        revocations: RevocationRegistry,
        config: CleanupConfig,
    ) -> Self {
        Self {
            refresh_tokens,
            revocations,
            config,
        }
    }

    /// Delete refresh tokens that expired before now
    pub async fn prune_refresh_tokens(&self) -> Result<u64, StoreError> {
        debug!("Pruning expired refresh tokens");
        let removed = self.refresh_tokens.prune_expired(Utc::now()).await?;
        info!(removed, "Expired refresh tokens pruned");
        Ok(removed)
    }

    /// Delete revocations whose token expired before now
    pub async fn prune_revoked_tokens(&self) -> Result<u64, StoreError> {
        debug!("Pruning expired revoked tokens");
        let removed = self.revocations.prune_expired(Utc::now()).await?;
        info!(removed, "Expired revoked tokens pruned");
        Ok(removed)
    }

    /// Run both jobs once, independently
    pub async fn run_once(&self) -> CleanupReport {
        CleanupReport {
            refresh_tokens_removed: log_failure("refresh token", self.prune_refresh_tokens().await),
            revoked_tokens_removed: log_failure("revoked token", self.prune_revoked_tokens().await),
        }
    }

    /// Register both jobs on a new scheduler and start it
    pub async fn start(&self) -> Result<CleanupHandle, CleanupError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| CleanupError::Scheduler(format!("{e:?}")))?;

        let refresh_job = {
            let this = self.clone();
            Job::new_async(self.config.refresh_token_cron.as_str(), move |_id, _sched| {
                let this = this.clone();
                Box::pin(async move {
                    log_failure("refresh token", this.prune_refresh_tokens().await);
                })
            })
            .map_err(|e| CleanupError::InvalidSchedule {
                expression: self.config.refresh_token_cron.clone(),
                message: format!("{e:?}"),
            })?
        };

        let revoked_job = {
            let this = self.clone();
            Job::new_async(self.config.revoked_token_cron.as_str(), move |_id, _sched| {
                let this = this.clone();
                Box::pin(async move {
                    log_failure("revoked token", this.prune_revoked_tokens().await);
                })
            })
            .map_err(|e| CleanupError::InvalidSchedule {
                expression: self.config.revoked_token_cron.clone(),
                message: format!("{e:?}"),
            })?
        };

        for job in [refresh_job, revoked_job] {
            scheduler
                .add(job)
                .await
                .map_err(|e| CleanupError::Scheduler(format!("{e:?}")))?;
        }
        scheduler
            .start()
            .await
            .map_err(|e| CleanupError::Scheduler(format!("{e:?}")))?;

        info!(
            refresh_tokens = %self.config.refresh_token_cron,
            revoked_tokens = %self.config.revoked_token_cron,
            "Token cleanup scheduled"
        );
        Ok(CleanupHandle { scheduler })
    }
}

fn log_failure(job: &str, result: Result<u64, StoreError>) -> Option<u64> {
    match result {
        Ok(removed) => Some(removed),
        Err(e) => {
            error!(error = %e, "Failed to prune expired {} records", job);
            None
        }
    }
}

/// Running scheduler
pub struct CleanupHandle {
    scheduler: JobScheduler,
}

impl CleanupHandle {
    pub async fn shutdown(mut self) {
        if let Err(e) = self.scheduler.shutdown().await {
            error!("Failed to stop cleanup scheduler: {:?}", e);
        }
    }
}
