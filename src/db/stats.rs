//! AnalysisStats adaptor: the aggregate row, its sync lock, and counters.
//!
//! The sync lock is a conditional update: whoever flips `sync_lock` from 0
//! to 1 owns the synchronization pass, and exactly one coordinator can
//! observe `rows_affected = 1`. Persisting the row releases the lock.

use sqlx::Row;

use super::{datetime_from_epoch, Database, DbError, DbResult};
use crate::analysis::{AnalysisStats, AnalysisStatus};

fn stats_from_row(row: &sqlx::any::AnyRow) -> DbResult<AnalysisStats> {
    let analysis_id: i64 = row.try_get("analysis_id")?;
    let status_str: String = row.try_get("status")?;
    let status = AnalysisStatus::parse(&status_str).ok_or_else(|| {
        DbError::Corrupt(format!("analysis {analysis_id}: unknown status '{status_str}'"))
    })?;
    let when_updated = match row.try_get::<Option<i64>, _>("when_updated_epoch")? {
        Some(epoch) => Some(datetime_from_epoch(epoch, "analysis_stats.when_updated")?),
        None => None,
    };
    Ok(AnalysisStats {
        analysis_id,
        status,
        total_job_count: row.try_get("total_job_count")?,
        semaphored_job_count: row.try_get("semaphored_job_count")?,
        ready_job_count: row.try_get("ready_job_count")?,
        done_job_count: row.try_get("done_job_count")?,
        failed_job_count: row.try_get("failed_job_count")?,
        num_required_workers: row.try_get("num_required_workers")?,
        num_running_workers: row.try_get("num_running_workers")?,
        hive_capacity: row.try_get("hive_capacity")?,
        batch_size: row.try_get("batch_size")?,
        avg_msec_per_job: row.try_get("avg_msec_per_job")?,
        sync_lock: row.try_get::<i64, _>("sync_lock")? != 0,
        when_updated,
        seconds_since_last_update: row.try_get("seconds_since_last_update")?,
    })
}

impl Database {
    /// Fetch the stats row, including its database-computed staleness.
    pub async fn fetch_analysis_stats(&self, analysis_id: i64) -> DbResult<AnalysisStats> {
        let sql = format!(
            "SELECT analysis_id, status, total_job_count, semaphored_job_count, \
                    ready_job_count, done_job_count, failed_job_count, \
                    num_required_workers, num_running_workers, hive_capacity, batch_size, \
                    avg_msec_per_job, sync_lock, \
                    {when_updated_epoch} AS when_updated_epoch, \
                    {seconds_since} AS seconds_since_last_update \
             FROM analysis_stats WHERE analysis_id = ?",
            when_updated_epoch = self.dialect.epoch("when_updated"),
            seconds_since = self.dialect.seconds_since("when_updated"),
        );
        let row = sqlx::query(&sql)
            .bind(analysis_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("analysis_stats {analysis_id}")))?;
        stats_from_row(&row)
    }

    /// Try to claim the per-analysis sync lock. Returns the number of rows
    /// updated: 1 means this coordinator owns the pass, 0 means someone else
    /// holds the lock (or the row is gone).
    pub async fn claim_sync_lock(&self, analysis_id: i64) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE analysis_stats \
             SET status = 'SYNCHING', sync_lock = 1, when_updated = CURRENT_TIMESTAMP \
             WHERE analysis_id = ? AND sync_lock = 0",
        )
        .bind(analysis_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Break a sync lock older than `ttl_seconds` (a crashed coordinator
    /// left the analysis SYNCHING). Returns 1 if the lock was broken.
    pub async fn break_stale_sync_lock(&self, analysis_id: i64, ttl_seconds: i64) -> DbResult<u64> {
        let sql = format!(
            "UPDATE analysis_stats SET sync_lock = 0 \
             WHERE analysis_id = ? AND sync_lock = 1 AND {age} > ?",
            age = self.dialect.seconds_since("when_updated"),
        );
        let result = sqlx::query(&sql)
            .bind(analysis_id)
            .bind(ttl_seconds)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Persist a synchronized stats row. Releases the sync lock and stamps
    /// `when_updated`.
    pub async fn persist_analysis_stats(&self, stats: &AnalysisStats) -> DbResult<()> {
        sqlx::query(
            "UPDATE analysis_stats \
             SET status = ?, total_job_count = ?, semaphored_job_count = ?, \
                 ready_job_count = ?, done_job_count = ?, failed_job_count = ?, \
                 num_required_workers = ?, num_running_workers = ?, \
                 avg_msec_per_job = ?, sync_lock = 0, when_updated = CURRENT_TIMESTAMP \
             WHERE analysis_id = ?",
        )
        .bind(stats.status.as_str())
        .bind(stats.total_job_count)
        .bind(stats.semaphored_job_count)
        .bind(stats.ready_job_count)
        .bind(stats.done_job_count)
        .bind(stats.failed_job_count)
        .bind(stats.num_required_workers)
        .bind(stats.num_running_workers)
        .bind(stats.avg_msec_per_job)
        .bind(stats.analysis_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_analysis_status(
        &self,
        analysis_id: i64,
        status: AnalysisStatus,
    ) -> DbResult<()> {
        sqlx::query("UPDATE analysis_stats SET status = ? WHERE analysis_id = ?")
            .bind(status.as_str())
            .bind(analysis_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn increase_required_workers(&self, analysis_id: i64, delta: i64) -> DbResult<()> {
        sqlx::query(
            "UPDATE analysis_stats SET num_required_workers = num_required_workers + ? \
             WHERE analysis_id = ?",
        )
        .bind(delta)
        .bind(analysis_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Decrement the required-worker count, never below zero.
    pub async fn decrease_required_workers(&self, analysis_id: i64) -> DbResult<()> {
        sqlx::query(
            "UPDATE analysis_stats \
             SET num_required_workers = CASE WHEN num_required_workers > 0 \
                 THEN num_required_workers - 1 ELSE 0 END \
             WHERE analysis_id = ?",
        )
        .bind(analysis_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn increase_running_workers(&self, analysis_id: i64) -> DbResult<()> {
        sqlx::query(
            "UPDATE analysis_stats SET num_running_workers = num_running_workers + 1 \
             WHERE analysis_id = ?",
        )
        .bind(analysis_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Decrement the running-worker count, never below zero.
    pub async fn decrease_running_workers(&self, analysis_id: i64) -> DbResult<()> {
        sqlx::query(
            "UPDATE analysis_stats \
             SET num_running_workers = CASE WHEN num_running_workers > 0 \
                 THEN num_running_workers - 1 ELSE 0 END \
             WHERE analysis_id = ?",
        )
        .bind(analysis_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Hive fullness: `Σ 1/hive_capacity` over live workers whose analysis
    /// is capacity-bounded. 1.0 is "full"; 0 when nothing is running.
    pub async fn get_hive_current_load(&self) -> DbResult<f64> {
        let row = sqlx::query(
            "SELECT SUM(1e0 / s.hive_capacity) AS current_load \
             FROM worker w \
             JOIN analysis_stats s ON s.analysis_id = w.analysis_id \
             WHERE w.died IS NULL AND s.hive_capacity > 0",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<Option<f64>, _>("current_load")?.unwrap_or(0.0))
    }

    /// Append one throughput sample to the monitor table.
    pub async fn insert_monitor_sample(&self, num_workers: i64, hive_load: f64) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO monitor (sampled_at, num_workers, hive_load) \
             VALUES (CURRENT_TIMESTAMP, ?, ?)",
        )
        .bind(num_workers)
        .bind(hive_load)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
