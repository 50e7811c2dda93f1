//! Analysis adaptor: analysis rows, suitability ordering, control rules.

use sqlx::Row;

use super::{Database, DbError, DbResult};
use crate::analysis::{Analysis, NewAnalysis};

const ANALYSIS_COLUMNS: &str = "analysis_id, logic_name, resource_class_id, priority, \
     meadow_type, failed_job_tolerance";

fn analysis_from_row(row: &sqlx::any::AnyRow) -> DbResult<Analysis> {
    Ok(Analysis {
        analysis_id: row.try_get("analysis_id")?,
        logic_name: row.try_get("logic_name")?,
        resource_class_id: row.try_get("resource_class_id")?,
        priority: row.try_get("priority")?,
        meadow_type: row.try_get("meadow_type")?,
        failed_job_tolerance: row.try_get("failed_job_tolerance")?,
    })
}

impl Database {
    /// Register a new analysis together with its stats row.
    pub async fn insert_analysis(&self, new: &NewAnalysis) -> DbResult<i64> {
        let result = sqlx::query(
            "INSERT INTO analysis_base \
                 (logic_name, resource_class_id, priority, meadow_type, failed_job_tolerance) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&new.logic_name)
        .bind(new.resource_class_id)
        .bind(new.priority)
        .bind(&new.meadow_type)
        .bind(new.failed_job_tolerance)
        .execute(&self.pool)
        .await?;
        let analysis_id = result
            .last_insert_id()
            .ok_or_else(|| DbError::Corrupt("analysis insert returned no id".to_string()))?;

        sqlx::query(
            "INSERT INTO analysis_stats (analysis_id, status, hive_capacity, batch_size) \
             VALUES (?, 'LOADING', ?, ?)",
        )
        .bind(analysis_id)
        .bind(new.hive_capacity)
        .bind(new.batch_size.max(1))
        .execute(&self.pool)
        .await?;

        Ok(analysis_id)
    }

    pub async fn fetch_analysis_by_id(&self, analysis_id: i64) -> DbResult<Analysis> {
        let sql = format!("SELECT {ANALYSIS_COLUMNS} FROM analysis_base WHERE analysis_id = ?");
        let row = sqlx::query(&sql)
            .bind(analysis_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("analysis {analysis_id}")))?;
        analysis_from_row(&row)
    }

    pub async fn fetch_analysis_by_logic_name(&self, logic_name: &str) -> DbResult<Analysis> {
        let sql = format!("SELECT {ANALYSIS_COLUMNS} FROM analysis_base WHERE logic_name = ?");
        let row = sqlx::query(&sql)
            .bind(logic_name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("analysis '{logic_name}'")))?;
        analysis_from_row(&row)
    }

    /// All analyses in suitability order (priority descending, then id),
    /// optionally restricted to one resource class.
    pub async fn fetch_analyses_by_suitability(
        &self,
        resource_class_id: Option<i64>,
    ) -> DbResult<Vec<Analysis>> {
        let rows = match resource_class_id {
            Some(rc_id) => {
                let sql = format!(
                    "SELECT {ANALYSIS_COLUMNS} FROM analysis_base \
                     WHERE resource_class_id = ? \
                     ORDER BY priority DESC, analysis_id"
                );
                sqlx::query(&sql).bind(rc_id).fetch_all(&self.pool).await?
            }
            None => {
                let sql = format!(
                    "SELECT {ANALYSIS_COLUMNS} FROM analysis_base \
                     ORDER BY priority DESC, analysis_id"
                );
                sqlx::query(&sql).fetch_all(&self.pool).await?
            }
        };
        rows.iter().map(analysis_from_row).collect()
    }

    /// Add a blocking control rule: `ctrled` stays BLOCKED until
    /// `condition` is DONE.
    pub async fn insert_ctrl_rule(&self, condition_analysis_id: i64, ctrled_analysis_id: i64) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO analysis_ctrl_rule (condition_analysis_id, ctrled_analysis_id) \
             VALUES (?, ?)",
        )
        .bind(condition_analysis_id)
        .bind(ctrled_analysis_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Whether any condition analysis of this one is still not DONE.
    pub async fn has_open_blocking_rules(&self, analysis_id: i64) -> DbResult<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS open_rules \
             FROM analysis_ctrl_rule r \
             JOIN analysis_stats s ON s.analysis_id = r.condition_analysis_id \
             WHERE r.ctrled_analysis_id = ? AND s.status <> 'DONE'",
        )
        .bind(analysis_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("open_rules")? > 0)
    }

    /// Count analyses whose stats are FAILED, optionally just one.
    pub async fn count_failed_analyses(&self, filter_analysis_id: Option<i64>) -> DbResult<i64> {
        let row = match filter_analysis_id {
            Some(analysis_id) => {
                sqlx::query(
                    "SELECT COUNT(*) AS failed FROM analysis_stats \
                     WHERE status = 'FAILED' AND analysis_id = ?",
                )
                .bind(analysis_id)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT COUNT(*) AS failed FROM analysis_stats WHERE status = 'FAILED'")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(row.try_get("failed")?)
    }

    // ========================================================================
    // Resource classes
    // ========================================================================

    pub async fn insert_resource_class(&self, name: &str) -> DbResult<i64> {
        let result = sqlx::query("INSERT INTO resource_class (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        result
            .last_insert_id()
            .ok_or_else(|| DbError::Corrupt("resource class insert returned no id".to_string()))
    }

    pub async fn fetch_resource_class_id_by_name(&self, name: &str) -> DbResult<Option<i64>> {
        let row = sqlx::query("SELECT resource_class_id FROM resource_class WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("resource_class_id")?)),
            None => Ok(None),
        }
    }

    pub async fn fetch_resource_class_name_by_id(&self, resource_class_id: i64) -> DbResult<Option<String>> {
        let row = sqlx::query("SELECT name FROM resource_class WHERE resource_class_id = ?")
            .bind(resource_class_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("name")?)),
            None => Ok(None),
        }
    }

    /// Map of every resource class id to its name, for scheduler accounting.
    pub async fn fetch_resource_class_names(&self) -> DbResult<std::collections::HashMap<i64, String>> {
        let rows = sqlx::query("SELECT resource_class_id, name FROM resource_class")
            .fetch_all(&self.pool)
            .await?;
        let mut names = std::collections::HashMap::with_capacity(rows.len());
        for row in rows {
            names.insert(row.try_get("resource_class_id")?, row.try_get("name")?);
        }
        Ok(names)
    }
}
