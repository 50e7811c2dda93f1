//! Worker adaptor: birth, check-in, death, and activity history.
//!
//! The death update is guarded by `died IS NULL` so burying a worker twice
//! is a no-op, which keeps beekeeper-level retries safe.

use sqlx::Row;

use super::{datetime_from_epoch, Database, DbError, DbResult};
use crate::profiler::WorkerInterval;
use crate::worker::{CauseOfDeath, Worker, WorkerRegistration, WorkerStatus};

fn worker_from_row(row: &sqlx::any::AnyRow) -> DbResult<Worker> {
    let worker_id: i64 = row.try_get("worker_id")?;
    let status_str: String = row.try_get("status")?;
    let status = WorkerStatus::parse(&status_str).ok_or_else(|| {
        DbError::Corrupt(format!("worker {worker_id}: unknown status '{status_str}'"))
    })?;
    let cause_of_death = match row.try_get::<Option<String>, _>("cause_of_death")? {
        Some(cause_str) => Some(CauseOfDeath::parse(&cause_str).ok_or_else(|| {
            DbError::Corrupt(format!("worker {worker_id}: unknown cause '{cause_str}'"))
        })?),
        None => None,
    };
    let died = match row.try_get::<Option<i64>, _>("died_epoch")? {
        Some(epoch) => Some(datetime_from_epoch(epoch, "worker.died")?),
        None => None,
    };
    Ok(Worker {
        worker_id,
        meadow_type: row.try_get("meadow_type")?,
        meadow_name: row.try_get("meadow_name")?,
        host: row.try_get("host")?,
        process_id: row.try_get("process_id")?,
        resource_class_id: row.try_get("resource_class_id")?,
        analysis_id: row.try_get("analysis_id")?,
        born: datetime_from_epoch(row.try_get("born_epoch")?, "worker.born")?,
        last_check_in: datetime_from_epoch(row.try_get("check_in_epoch")?, "worker.last_check_in")?,
        died,
        status,
        work_done: row.try_get("work_done")?,
        cause_of_death,
        log_dir: row.try_get("log_dir")?,
    })
}

impl Database {
    fn worker_select_sql(&self, where_clause: &str) -> String {
        format!(
            "SELECT worker_id, meadow_type, meadow_name, host, process_id, \
                    resource_class_id, analysis_id, \
                    {born} AS born_epoch, \
                    {check_in} AS check_in_epoch, \
                    {died} AS died_epoch, \
                    status, work_done, cause_of_death, log_dir \
             FROM worker {where_clause}",
            born = self.dialect.epoch("born"),
            check_in = self.dialect.epoch("last_check_in"),
            died = self.dialect.epoch("died"),
        )
    }

    /// Insert a newborn worker row; the database assigns the id.
    pub async fn insert_worker(
        &self,
        registration: &WorkerRegistration,
        resource_class_id: i64,
    ) -> DbResult<i64> {
        let result = sqlx::query(
            "INSERT INTO worker \
                 (meadow_type, meadow_name, host, process_id, resource_class_id, \
                  status, born, last_check_in, work_done) \
             VALUES (?, ?, ?, ?, ?, 'READY', CURRENT_TIMESTAMP, CURRENT_TIMESTAMP, 0)",
        )
        .bind(&registration.meadow_type)
        .bind(&registration.meadow_name)
        .bind(&registration.host)
        .bind(&registration.process_id)
        .bind(resource_class_id)
        .execute(&self.pool)
        .await?;
        result
            .last_insert_id()
            .ok_or_else(|| DbError::Corrupt("worker insert returned no id".to_string()))
    }

    /// Remove a worker row. Only for rolling back a registration that
    /// failed halfway; buried workers keep their rows.
    pub async fn delete_worker(&self, worker_id: i64) -> DbResult<()> {
        sqlx::query("DELETE FROM worker WHERE worker_id = ?")
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn fetch_worker_by_id(&self, worker_id: i64) -> DbResult<Worker> {
        let sql = self.worker_select_sql("WHERE worker_id = ?");
        let row = sqlx::query(&sql)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("worker {worker_id}")))?;
        worker_from_row(&row)
    }

    /// Every worker not yet buried, for the garbage collector.
    pub async fn fetch_all_non_dead_workers(&self) -> DbResult<Vec<Worker>> {
        let sql = self.worker_select_sql("WHERE died IS NULL ORDER BY worker_id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(worker_from_row).collect()
    }

    pub async fn count_alive_workers(&self) -> DbResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS alive FROM worker WHERE died IS NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("alive")?)
    }

    pub async fn count_alive_workers_for_analysis(&self, analysis_id: i64) -> DbResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS alive FROM worker WHERE analysis_id = ? AND died IS NULL",
        )
        .bind(analysis_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("alive")?)
    }

    pub async fn update_worker_log_dir(&self, worker_id: i64, log_dir: &str) -> DbResult<()> {
        sqlx::query("UPDATE worker SET log_dir = ? WHERE worker_id = ?")
            .bind(log_dir)
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_worker_analysis(&self, worker_id: i64, analysis_id: i64) -> DbResult<()> {
        sqlx::query("UPDATE worker SET analysis_id = ? WHERE worker_id = ?")
            .bind(analysis_id)
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a periodic check-in: touch the heartbeat, mirror status and
    /// the work counter.
    pub async fn check_in_worker(
        &self,
        worker_id: i64,
        status: WorkerStatus,
        work_done: i64,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE worker SET last_check_in = CURRENT_TIMESTAMP, status = ?, work_done = ? \
             WHERE worker_id = ?",
        )
        .bind(status.as_str())
        .bind(work_done)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a worker dead. Guarded by `died IS NULL`; returns the number of
    /// rows updated, so a second burial reports 0 and the caller skips the
    /// post-death bookkeeping.
    pub async fn record_worker_death(
        &self,
        worker_id: i64,
        work_done: i64,
        cause: CauseOfDeath,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE worker \
             SET died = CURRENT_TIMESTAMP, last_check_in = CURRENT_TIMESTAMP, \
                 status = 'DEAD', work_done = ?, cause_of_death = ? \
             WHERE worker_id = ? AND died IS NULL",
        )
        .bind(work_done)
        .bind(cause.as_str())
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Activity history (profiler input)
    // ========================================================================

    /// Default profiling bounds: `(MIN(born), MAX(died))` as epoch seconds.
    /// The upper bound is `None` when no worker has died yet.
    pub async fn fetch_worker_activity_bounds(&self) -> DbResult<(Option<i64>, Option<i64>)> {
        let sql = format!(
            "SELECT MIN({born}) AS first_born, MAX({died}) AS last_died FROM worker",
            born = self.dialect.epoch("born"),
            died = self.dialect.epoch("died"),
        );
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok((row.try_get("first_born")?, row.try_get("last_died")?))
    }

    /// Birth/death intervals of every specialized worker overlapping the
    /// given epoch range.
    pub async fn fetch_worker_activity(
        &self,
        range_start: i64,
        range_end: i64,
    ) -> DbResult<Vec<WorkerInterval>> {
        let sql = format!(
            "SELECT w.analysis_id AS analysis_id, a.logic_name AS logic_name, \
                    {born} AS born_epoch, {died} AS died_epoch \
             FROM worker w \
             JOIN analysis_base a ON a.analysis_id = w.analysis_id \
             WHERE w.analysis_id IS NOT NULL \
               AND {born} <= ? \
               AND ({died} IS NULL OR {died} >= ?) \
             ORDER BY w.worker_id",
            born = self.dialect.epoch("w.born"),
            died = self.dialect.epoch("w.died"),
        );
        let rows = sqlx::query(&sql)
            .bind(range_end)
            .bind(range_start)
            .fetch_all(&self.pool)
            .await?;
        let mut intervals = Vec::with_capacity(rows.len());
        for row in rows {
            intervals.push(WorkerInterval {
                analysis_id: row.try_get("analysis_id")?,
                logic_name: row.try_get("logic_name")?,
                born: row.try_get("born_epoch")?,
                died: row.try_get("died_epoch")?,
            });
        }
        Ok(intervals)
    }
}
