//! Statistics synchronizer: rebuilds `analysis_stats` aggregates from the
//! ground-truth job and worker tables under the per-analysis sync lock.

use std::time::Instant;

use tracing::{debug, info};

use super::{Queen, QueenError};
use crate::analysis::{Analysis, AnalysisStats, AnalysisStatus};
use crate::job::JobStatus;

/// A WORKING analysis synced within this window is considered fresh.
const RECENT_SYNC_SECONDS: i64 = 180;

impl Queen {
    /// Guarded entry point for synchronization.
    ///
    /// Fast-returns the snapshot untouched when the analysis is already
    /// SYNCHING or DONE, when another coordinator holds the sync lock, or
    /// when a WORKING analysis was synced within the last three minutes.
    /// Otherwise claims the lock by conditional update; only the
    /// coordinator that observes exactly one updated row runs the sync.
    ///
    /// A lock older than the configured TTL is assumed to belong to a
    /// crashed coordinator: it is broken and the claim retried once.
    pub async fn safe_synchronize_analysis_stats(
        &self,
        stats: AnalysisStats,
    ) -> Result<AnalysisStats, QueenError> {
        let stale_lock = stats.sync_lock
            && stats
                .seconds_since_last_update
                .is_some_and(|age| age > self.config.sync_lock_timeout_secs);
        if stale_lock {
            // A crashed coordinator left the analysis SYNCHING; break its
            // lock and fall through to the regular claim.
            if self
                .db
                .break_stale_sync_lock(stats.analysis_id, self.config.sync_lock_timeout_secs)
                .await?
                == 0
            {
                // Someone else broke and re-claimed it first.
                return Ok(stats);
            }
            info!(
                analysis_id = stats.analysis_id,
                "broke stale sync lock left by a dead coordinator"
            );
        } else {
            if matches!(stats.status, AnalysisStatus::Synching | AnalysisStatus::Done) {
                return Ok(stats);
            }
            if stats.sync_lock {
                debug!(analysis_id = stats.analysis_id, "sync lock held; skipping");
                return Ok(stats);
            }
            if stats.status == AnalysisStatus::Working
                && stats
                    .seconds_since_last_update
                    .is_some_and(|age| age < RECENT_SYNC_SECONDS)
            {
                return Ok(stats);
            }
        }

        if self.db.claim_sync_lock(stats.analysis_id).await? != 1 {
            debug!(analysis_id = stats.analysis_id, "lost the sync lock race");
            return Ok(stats);
        }
        self.synchronize_analysis_stats(stats.analysis_id).await
    }

    /// Rebuild one analysis' aggregates and recompute its required-worker
    /// count. Persisting the row releases the sync lock.
    ///
    /// With database triggers maintaining live counts only the
    /// required-worker figure is recomputed; otherwise jobs are recounted
    /// with one `GROUP BY status` pass and running workers from the worker
    /// table.
    pub async fn synchronize_analysis_stats(
        &self,
        analysis_id: i64,
    ) -> Result<AnalysisStats, QueenError> {
        let analysis = self.db.fetch_analysis_by_id(analysis_id).await?;
        let mut stats = self.db.fetch_analysis_stats(analysis_id).await?;

        if self.db.hive_uses_triggers() {
            stats.recompute_required_workers();
        } else {
            let counts = self.db.count_jobs_by_status(analysis_id).await?;
            let count = |status: JobStatus| counts.get(&status).copied().unwrap_or(0);
            stats.total_job_count = counts.values().sum();
            stats.ready_job_count = count(JobStatus::Ready);
            stats.semaphored_job_count = count(JobStatus::Semaphored);
            stats.failed_job_count = count(JobStatus::Failed);
            stats.done_job_count = count(JobStatus::Done) + count(JobStatus::PassedOn);
            stats.num_running_workers =
                self.db.count_alive_workers_for_analysis(analysis_id).await?;
            stats.recompute_required_workers();
        }

        if self.db.has_open_blocking_rules(analysis_id).await? {
            stats.status = AnalysisStatus::Blocked;
        } else {
            if stats.status == AnalysisStatus::Blocked {
                stats.status = AnalysisStatus::Loading;
            }
            stats.determine_status(analysis.failed_job_tolerance);
        }

        self.db.persist_analysis_stats(&stats).await?;
        self.db.fetch_analysis_stats(analysis_id).await.map_err(Into::into)
    }

    /// Synchronize every analysis (or just one). Logs an x/o progress
    /// string: one `x` per blocked analysis, one `o` per other.
    pub async fn synchronize_hive(&self, filter: Option<&Analysis>) -> Result<(), QueenError> {
        let analyses = match filter {
            Some(analysis) => vec![analysis.clone()],
            None => self.db.fetch_analyses_by_suitability(None).await?,
        };
        let started = Instant::now();
        let mut progress = String::with_capacity(analyses.len());
        for analysis in &analyses {
            let stats = self.db.fetch_analysis_stats(analysis.analysis_id).await?;
            let synced = self.safe_synchronize_analysis_stats(stats).await?;
            progress.push(if synced.status == AnalysisStatus::Blocked {
                'x'
            } else {
                'o'
            });
        }
        info!(
            analyses = analyses.len(),
            progress = %progress,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "hive synchronized"
        );
        Ok(())
    }

    /// Current hive fullness; 1.0 is "full".
    pub async fn get_hive_current_load(&self) -> Result<f64, QueenError> {
        self.db.get_hive_current_load().await.map_err(Into::into)
    }

    /// Append one monitor sample: live worker count and hive load.
    pub async fn record_monitor_sample(&self) -> Result<(), QueenError> {
        let num_workers = self.db.count_alive_workers().await?;
        let hive_load = self.db.get_hive_current_load().await?;
        self.db.insert_monitor_sample(num_workers, hive_load).await?;
        Ok(())
    }
}
