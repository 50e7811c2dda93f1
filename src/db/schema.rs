//! Embedded schema DDL for fresh hive databases.
//!
//! Deployment tooling normally ships versioned migration scripts; the DDL
//! here exists so tests and newly provisioned hives can bootstrap a working
//! schema in one call. Statements are kept dialect-specific because the two
//! families disagree on auto-increment and timestamp column syntax.

use super::{Database, DbResult, Dialect, SCHEMA_VERSION};

const SQLITE_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS hive_meta (
        meta_key    VARCHAR(255) NOT NULL PRIMARY KEY,
        meta_value  TEXT
    )",
    "CREATE TABLE IF NOT EXISTS resource_class (
        resource_class_id INTEGER PRIMARY KEY AUTOINCREMENT,
        name              VARCHAR(255) NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS analysis_base (
        analysis_id          INTEGER PRIMARY KEY AUTOINCREMENT,
        logic_name           VARCHAR(255) NOT NULL UNIQUE,
        resource_class_id    INTEGER NOT NULL,
        priority             INTEGER NOT NULL DEFAULT 0,
        meadow_type          VARCHAR(255),
        failed_job_tolerance INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS analysis_stats (
        analysis_id          INTEGER NOT NULL PRIMARY KEY,
        status               VARCHAR(32) NOT NULL DEFAULT 'LOADING',
        total_job_count      INTEGER NOT NULL DEFAULT 0,
        semaphored_job_count INTEGER NOT NULL DEFAULT 0,
        ready_job_count      INTEGER NOT NULL DEFAULT 0,
        done_job_count       INTEGER NOT NULL DEFAULT 0,
        failed_job_count     INTEGER NOT NULL DEFAULT 0,
        num_required_workers INTEGER NOT NULL DEFAULT 0,
        num_running_workers  INTEGER NOT NULL DEFAULT 0,
        hive_capacity        INTEGER NOT NULL DEFAULT 0,
        batch_size           INTEGER NOT NULL DEFAULT 1,
        avg_msec_per_job     INTEGER,
        sync_lock            INTEGER NOT NULL DEFAULT 0,
        when_updated         TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS worker (
        worker_id         INTEGER PRIMARY KEY AUTOINCREMENT,
        meadow_type       VARCHAR(255) NOT NULL,
        meadow_name       VARCHAR(255) NOT NULL,
        host              VARCHAR(255) NOT NULL,
        process_id        VARCHAR(255) NOT NULL,
        resource_class_id INTEGER NOT NULL,
        analysis_id       INTEGER,
        born              TIMESTAMP NOT NULL,
        last_check_in     TIMESTAMP NOT NULL,
        died              TIMESTAMP,
        status            VARCHAR(32) NOT NULL DEFAULT 'READY',
        work_done         INTEGER NOT NULL DEFAULT 0,
        cause_of_death    VARCHAR(32),
        log_dir           TEXT
    )",
    "CREATE INDEX IF NOT EXISTS worker_analysis_idx ON worker (analysis_id, died)",
    "CREATE TABLE IF NOT EXISTS job (
        job_id            INTEGER PRIMARY KEY AUTOINCREMENT,
        analysis_id       INTEGER NOT NULL,
        worker_id         INTEGER,
        status            VARCHAR(32) NOT NULL DEFAULT 'READY',
        retry_count       INTEGER NOT NULL DEFAULT 0,
        semaphore_count   INTEGER NOT NULL DEFAULT 0,
        semaphored_job_id INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS job_analysis_status_idx ON job (analysis_id, status)",
    "CREATE INDEX IF NOT EXISTS job_worker_idx ON job (worker_id)",
    "CREATE TABLE IF NOT EXISTS analysis_ctrl_rule (
        condition_analysis_id INTEGER NOT NULL,
        ctrled_analysis_id    INTEGER NOT NULL,
        PRIMARY KEY (condition_analysis_id, ctrled_analysis_id)
    )",
    "CREATE TABLE IF NOT EXISTS monitor (
        sampled_at  TIMESTAMP NOT NULL,
        num_workers INTEGER NOT NULL,
        hive_load   DOUBLE NOT NULL
    )",
];

const MYSQL_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS hive_meta (
        meta_key    VARCHAR(255) NOT NULL PRIMARY KEY,
        meta_value  TEXT
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS resource_class (
        resource_class_id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        name              VARCHAR(255) NOT NULL UNIQUE
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS analysis_base (
        analysis_id          BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        logic_name           VARCHAR(255) NOT NULL UNIQUE,
        resource_class_id    BIGINT NOT NULL,
        priority             INT NOT NULL DEFAULT 0,
        meadow_type          VARCHAR(255),
        failed_job_tolerance INT NOT NULL DEFAULT 0
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS analysis_stats (
        analysis_id          BIGINT NOT NULL PRIMARY KEY,
        status               VARCHAR(32) NOT NULL DEFAULT 'LOADING',
        total_job_count      BIGINT NOT NULL DEFAULT 0,
        semaphored_job_count BIGINT NOT NULL DEFAULT 0,
        ready_job_count      BIGINT NOT NULL DEFAULT 0,
        done_job_count       BIGINT NOT NULL DEFAULT 0,
        failed_job_count     BIGINT NOT NULL DEFAULT 0,
        num_required_workers BIGINT NOT NULL DEFAULT 0,
        num_running_workers  BIGINT NOT NULL DEFAULT 0,
        hive_capacity        BIGINT NOT NULL DEFAULT 0,
        batch_size           BIGINT NOT NULL DEFAULT 1,
        avg_msec_per_job     BIGINT,
        sync_lock            SMALLINT NOT NULL DEFAULT 0,
        when_updated         TIMESTAMP NULL
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS worker (
        worker_id         BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        meadow_type       VARCHAR(255) NOT NULL,
        meadow_name       VARCHAR(255) NOT NULL,
        host              VARCHAR(255) NOT NULL,
        process_id        VARCHAR(255) NOT NULL,
        resource_class_id BIGINT NOT NULL,
        analysis_id       BIGINT,
        born              TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        last_check_in     TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        died              TIMESTAMP NULL,
        status            VARCHAR(32) NOT NULL DEFAULT 'READY',
        work_done         BIGINT NOT NULL DEFAULT 0,
        cause_of_death    VARCHAR(32),
        log_dir           TEXT,
        INDEX worker_analysis_idx (analysis_id, died)
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS job (
        job_id            BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
        analysis_id       BIGINT NOT NULL,
        worker_id         BIGINT,
        status            VARCHAR(32) NOT NULL DEFAULT 'READY',
        retry_count       BIGINT NOT NULL DEFAULT 0,
        semaphore_count   BIGINT NOT NULL DEFAULT 0,
        semaphored_job_id BIGINT,
        INDEX job_analysis_status_idx (analysis_id, status),
        INDEX job_worker_idx (worker_id)
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS analysis_ctrl_rule (
        condition_analysis_id BIGINT NOT NULL,
        ctrled_analysis_id    BIGINT NOT NULL,
        PRIMARY KEY (condition_analysis_id, ctrled_analysis_id)
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS monitor (
        sampled_at  TIMESTAMP NOT NULL,
        num_workers BIGINT NOT NULL,
        hive_load   DOUBLE NOT NULL
    ) ENGINE=InnoDB",
];

/// Create all hive tables if missing and record the schema version.
pub async fn deploy(db: &Database) -> DbResult<()> {
    let statements = match db.dialect() {
        Dialect::Sqlite => SQLITE_DDL,
        Dialect::MySql => MYSQL_DDL,
    };
    for statement in statements {
        sqlx::query(statement).execute(db.pool()).await?;
    }
    db.store_meta(super::SCHEMA_VERSION_KEY, SCHEMA_VERSION).await?;
    Ok(())
}
