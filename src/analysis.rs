//! Analysis model and its mutable statistics aggregate.
//!
//! An analysis is one stage of the pipeline; workers specialize into exactly
//! one analysis and pull its jobs. `AnalysisStats` is an in-memory snapshot
//! of one `analysis_stats` row; it is a cache of the database and must be
//! refreshed before any decision that depends on its counts.

use chrono::{DateTime, Utc};

/// A pipeline stage.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub analysis_id: i64,
    pub logic_name: String,
    pub resource_class_id: i64,
    /// Suitability ordering key: higher priority analyses are offered
    /// workers first.
    pub priority: i32,
    /// Pins scheduling to one meadow type; `None` uses the valley default.
    pub meadow_type: Option<String>,
    /// Percentage of jobs allowed to fail before the analysis is FAILED.
    pub failed_job_tolerance: i32,
}

/// Parameters for registering a new analysis together with its stats row.
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub logic_name: String,
    pub resource_class_id: i64,
    pub priority: i32,
    pub meadow_type: Option<String>,
    pub failed_job_tolerance: i32,
    /// Concurrency cap; 0 disables the analysis for scheduling.
    pub hive_capacity: i64,
    /// Jobs one worker is expected to chew through per claim.
    pub batch_size: i64,
}

impl NewAnalysis {
    pub fn new(logic_name: impl Into<String>, resource_class_id: i64) -> Self {
        Self {
            logic_name: logic_name.into(),
            resource_class_id,
            priority: 0,
            meadow_type: None,
            failed_job_tolerance: 0,
            hive_capacity: 0,
            batch_size: 1,
        }
    }
}

/// Status of one analysis, as persisted in `analysis_stats.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStatus {
    Loading,
    Blocked,
    Synching,
    Ready,
    Working,
    AllClaimed,
    Done,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "LOADING",
            Self::Blocked => "BLOCKED",
            Self::Synching => "SYNCHING",
            Self::Ready => "READY",
            Self::Working => "WORKING",
            Self::AllClaimed => "ALL_CLAIMED",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOADING" => Some(Self::Loading),
            "BLOCKED" => Some(Self::Blocked),
            "SYNCHING" => Some(Self::Synching),
            "READY" => Some(Self::Ready),
            "WORKING" => Some(Self::Working),
            "ALL_CLAIMED" => Some(Self::AllClaimed),
            "DONE" => Some(Self::Done),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable aggregate for one analysis.
#[derive(Debug, Clone)]
pub struct AnalysisStats {
    pub analysis_id: i64,
    pub status: AnalysisStatus,
    pub total_job_count: i64,
    pub semaphored_job_count: i64,
    pub ready_job_count: i64,
    pub done_job_count: i64,
    pub failed_job_count: i64,
    pub num_required_workers: i64,
    pub num_running_workers: i64,
    pub hive_capacity: i64,
    pub batch_size: i64,
    pub avg_msec_per_job: Option<i64>,
    pub sync_lock: bool,
    pub when_updated: Option<DateTime<Utc>>,
    /// Staleness computed by the database at fetch time, so guard decisions
    /// do not depend on clock agreement between coordinators.
    pub seconds_since_last_update: Option<i64>,
}

impl AnalysisStats {
    /// Recompute `num_required_workers` from the ready-job backlog.
    ///
    /// `R = ceil(ready / batch_size)` for capacity-bounded analyses, then
    /// clamped by the unfulfilled capacity `hive_capacity - running`. A
    /// capacity of 0 disables the analysis and requests nothing. The result
    /// is never negative.
    pub fn recompute_required_workers(&mut self) {
        let mut required = if self.hive_capacity > 0 {
            let batch = self.batch_size.max(1);
            (self.ready_job_count + batch - 1) / batch
        } else {
            0
        };
        if self.hive_capacity > 0 {
            let unfulfilled = self.hive_capacity - self.num_running_workers;
            if unfulfilled < required {
                required = unfulfilled.max(0);
            }
        }
        self.num_required_workers = required.max(0);
    }

    /// Derive the status from the current counts. BLOCKED is sticky here:
    /// control rules are checked by the synchronizer before this is called.
    pub fn determine_status(&mut self, failed_job_tolerance: i32) {
        if self.status == AnalysisStatus::Blocked {
            return;
        }
        let terminal = self.done_job_count + self.failed_job_count;
        self.status = if self.num_running_workers > 0 {
            AnalysisStatus::Working
        } else if self.ready_job_count > 0 {
            AnalysisStatus::Ready
        } else if terminal >= self.total_job_count {
            let tolerated = i64::from(failed_job_tolerance) * self.total_job_count;
            if self.total_job_count > 0 && self.failed_job_count * 100 > tolerated {
                AnalysisStatus::Failed
            } else {
                AnalysisStatus::Done
            }
        } else {
            AnalysisStatus::AllClaimed
        };
    }
}
