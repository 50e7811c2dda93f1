//! Job adaptor: claiming, releasing, semaphores, and per-status counts.

use std::collections::HashMap;

use sqlx::Row;

use super::{Database, DbError, DbResult};
use crate::job::{Job, JobStatus, NewJob};

const JOB_COLUMNS: &str =
    "job_id, analysis_id, worker_id, status, retry_count, semaphore_count, semaphored_job_id";

fn job_from_row(row: &sqlx::any::AnyRow) -> DbResult<Job> {
    let job_id: i64 = row.try_get("job_id")?;
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| DbError::Corrupt(format!("job {job_id}: unknown status '{status_str}'")))?;
    Ok(Job {
        job_id,
        analysis_id: row.try_get("analysis_id")?,
        worker_id: row.try_get("worker_id")?,
        status,
        retry_count: row.try_get("retry_count")?,
        semaphore_count: row.try_get("semaphore_count")?,
        semaphored_job_id: row.try_get("semaphored_job_id")?,
    })
}

impl Database {
    pub async fn insert_job(&self, new: &NewJob) -> DbResult<i64> {
        let result = sqlx::query(
            "INSERT INTO job (analysis_id, status, semaphore_count, semaphored_job_id) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(new.analysis_id)
        .bind(new.status.as_str())
        .bind(new.semaphore_count)
        .bind(new.semaphored_job_id)
        .execute(&self.pool)
        .await?;
        result
            .last_insert_id()
            .ok_or_else(|| DbError::Corrupt("job insert returned no id".to_string()))
    }

    pub async fn fetch_job_by_id(&self, job_id: i64) -> DbResult<Job> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM job WHERE job_id = ?");
        let row = sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("job {job_id}")))?;
        job_from_row(&row)
    }

    /// Atomically reset-or-grab a job for one worker. The WHERE clause
    /// re-checks the status so two workers racing for the same job cannot
    /// both win; with `force` the terminal and semaphored states are also
    /// grabbable. Returns whether this worker got the job.
    pub async fn reset_or_grab_job(
        &self,
        job_id: i64,
        worker_id: i64,
        force: bool,
    ) -> DbResult<bool> {
        let sql = if force {
            "UPDATE job SET status = 'CLAIMED', worker_id = ? \
             WHERE job_id = ? \
               AND status IN ('READY', 'FAILED', 'PASSED_ON', 'DONE', 'SEMAPHORED')"
        } else {
            "UPDATE job SET status = 'CLAIMED', worker_id = ? \
             WHERE job_id = ? \
               AND status IN ('READY', 'FAILED', 'PASSED_ON')"
        };
        let result = sqlx::query(sql)
            .bind(worker_id)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Re-increment a parent job's semaphore because one of its controlled
    /// jobs is about to re-run. A parent that had already become READY is
    /// pushed back to SEMAPHORED.
    pub async fn increase_semaphore_count_for_job(&self, job_id: i64, delta: i64) -> DbResult<()> {
        sqlx::query(
            "UPDATE job \
             SET semaphore_count = semaphore_count + ?, \
                 status = CASE WHEN status = 'READY' THEN 'SEMAPHORED' ELSE status END \
             WHERE job_id = ?",
        )
        .bind(delta)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Release every in-flight job held by one worker back to READY.
    ///
    /// CLAIMED jobs were never started and keep their retry count; jobs the
    /// worker had begun executing get `retry_count + 1`. Returns how many
    /// jobs were released.
    pub async fn release_undone_jobs_from_worker(&self, worker_id: i64) -> DbResult<u64> {
        let claimed = sqlx::query(
            "UPDATE job SET status = 'READY', worker_id = NULL \
             WHERE worker_id = ? AND status = 'CLAIMED'",
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        let started = sqlx::query(
            "UPDATE job SET status = 'READY', worker_id = NULL, retry_count = retry_count + 1 \
             WHERE worker_id = ? \
               AND status IN ('PRE_CLEANUP', 'FETCH_INPUT', 'RUN', 'WRITE_OUTPUT', 'POST_CLEANUP')",
        )
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        Ok(claimed.rows_affected() + started.rows_affected())
    }

    /// Integrity pass: release non-terminal jobs still owned by workers
    /// that are already DEAD (buried in haste, without proper accounting).
    pub async fn release_jobs_buried_in_haste(&self) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE job SET status = 'READY', worker_id = NULL, retry_count = retry_count + 1 \
             WHERE worker_id IN (SELECT worker_id FROM worker WHERE status = 'DEAD') \
               AND status NOT IN ('DONE', 'READY', 'FAILED', 'PASSED_ON')",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Ground-truth recount for the synchronizer: jobs per status for one
    /// analysis.
    pub async fn count_jobs_by_status(
        &self,
        analysis_id: i64,
    ) -> DbResult<HashMap<JobStatus, i64>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS job_count FROM job \
             WHERE analysis_id = ? GROUP BY status",
        )
        .bind(analysis_id)
        .fetch_all(&self.pool)
        .await?;
        let mut counts = HashMap::with_capacity(rows.len());
        for row in rows {
            let status_str: String = row.try_get("status")?;
            let status = JobStatus::parse(&status_str).ok_or_else(|| {
                DbError::Corrupt(format!(
                    "analysis {analysis_id}: unknown job status '{status_str}'"
                ))
            })?;
            counts.insert(status, row.try_get("job_count")?);
        }
        Ok(counts)
    }

    /// Jobs currently owned by one worker, newest first.
    pub async fn fetch_jobs_for_worker(&self, worker_id: i64) -> DbResult<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM job WHERE worker_id = ? ORDER BY job_id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(worker_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }
}
