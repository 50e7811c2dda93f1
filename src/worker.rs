//! Worker model: one ephemeral process executing jobs of one analysis.
//!
//! A worker row is created by the Queen at birth, specialized to an analysis
//! exactly once, checks in periodically, and transitions to DEAD exactly
//! once. After death the row is never mutated again.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Status of a worker process, as persisted in `worker.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Ready,
    Claimed,
    PreCleanup,
    FetchInput,
    Run,
    WriteOutput,
    PostCleanup,
    Dead,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Claimed => "CLAIMED",
            Self::PreCleanup => "PRE_CLEANUP",
            Self::FetchInput => "FETCH_INPUT",
            Self::Run => "RUN",
            Self::WriteOutput => "WRITE_OUTPUT",
            Self::PostCleanup => "POST_CLEANUP",
            Self::Dead => "DEAD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "READY" => Some(Self::Ready),
            "CLAIMED" => Some(Self::Claimed),
            "PRE_CLEANUP" => Some(Self::PreCleanup),
            "FETCH_INPUT" => Some(Self::FetchInput),
            "RUN" => Some(Self::Run),
            "WRITE_OUTPUT" => Some(Self::WriteOutput),
            "POST_CLEANUP" => Some(Self::PostCleanup),
            "DEAD" => Some(Self::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a worker died (or should die).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CauseOfDeath {
    NoWork,
    JobLimit,
    Lifespan,
    HiveOverload,
    Memlimit,
    Runlimit,
    KilledByUser,
    SeeMsg,
    Contaminated,
    Unknown,
}

impl CauseOfDeath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoWork => "NO_WORK",
            Self::JobLimit => "JOB_LIMIT",
            Self::Lifespan => "LIFESPAN",
            Self::HiveOverload => "HIVE_OVERLOAD",
            Self::Memlimit => "MEMLIMIT",
            Self::Runlimit => "RUNLIMIT",
            Self::KilledByUser => "KILLED_BY_USER",
            Self::SeeMsg => "SEE_MSG",
            Self::Contaminated => "CONTAMINATED",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NO_WORK" => Some(Self::NoWork),
            "JOB_LIMIT" => Some(Self::JobLimit),
            "LIFESPAN" => Some(Self::Lifespan),
            "HIVE_OVERLOAD" => Some(Self::HiveOverload),
            "MEMLIMIT" => Some(Self::Memlimit),
            "RUNLIMIT" => Some(Self::Runlimit),
            "KILLED_BY_USER" => Some(Self::KilledByUser),
            "SEE_MSG" => Some(Self::SeeMsg),
            "CONTAMINATED" => Some(Self::Contaminated),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Whether a death with this cause reclaims the worker's in-flight jobs
    /// back to READY. Orderly causes (NO_WORK, JOB_LIMIT, LIFESPAN,
    /// HIVE_OVERLOAD) mean the worker finished its batch before exiting.
    pub fn releases_jobs(&self) -> bool {
        matches!(
            self,
            Self::Unknown
                | Self::Memlimit
                | Self::Runlimit
                | Self::KilledByUser
                | Self::SeeMsg
                | Self::Contaminated
        )
    }
}

impl std::fmt::Display for CauseOfDeath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory handle for one worker row.
#[derive(Debug, Clone)]
pub struct Worker {
    pub worker_id: i64,
    pub meadow_type: String,
    pub meadow_name: String,
    pub host: String,
    /// Meadow-assigned process identity; a string because cluster job ids
    /// are not numeric on every backend.
    pub process_id: String,
    pub resource_class_id: i64,
    pub analysis_id: Option<i64>,
    pub born: DateTime<Utc>,
    pub last_check_in: DateTime<Utc>,
    pub died: Option<DateTime<Utc>>,
    pub status: WorkerStatus,
    pub work_done: i64,
    pub cause_of_death: Option<CauseOfDeath>,
    pub log_dir: Option<String>,
}

/// Identity fields for registering a newborn worker.
#[derive(Debug, Clone)]
pub struct WorkerRegistration {
    pub meadow_type: String,
    pub meadow_name: String,
    pub host: String,
    pub process_id: String,
}

/// Optional knobs for worker creation.
#[derive(Debug, Clone, Default)]
pub struct WorkerOptions {
    /// Root directory for per-worker logs; when set, a fanned-out
    /// subdirectory is created and recorded on the row.
    pub log_root: Option<PathBuf>,
}
