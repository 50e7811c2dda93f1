//! The Queen: the coordinator regulating worker lifecycle, statistics
//! synchronization, and scheduling.
//!
//! Several queens (one per beekeeper process) may run against the same
//! database. They never talk to each other directly: every decision is a
//! read-check-write against the database, and the only explicit critical
//! section is the per-analysis sync lock taken by conditional update.

mod lifecycle;
mod scheduler;
mod sync;

use std::path::PathBuf;

use thiserror::Error;

pub use lifecycle::{
    AnalysisRef, DeadWorkerSweep, ResourceClassSelector, SpecializationOutcome,
    SpecializationTarget,
};
pub use scheduler::SubmissionPlan;

use crate::config::HiveConfig;
use crate::db::{Database, DbError};
use crate::job::JobStatus;
use crate::worker::CauseOfDeath;

/// Why a freshly created worker could not be bound to an analysis. The
/// worker that hit one of these is expected to die with the recommended
/// cause of death.
#[derive(Debug, Error)]
pub enum SpecializationError {
    #[error("hive is overloaded (load {load:.2})")]
    HiveOverloaded { load: f64 },

    #[error("analysis '{0}' is blocked")]
    AnalysisBlocked(String),

    #[error("analysis '{logic_name}' is at its capacity of {capacity}")]
    AnalysisAtCapacity { logic_name: String, capacity: i64 },

    #[error("analysis '{0}' needs no more workers")]
    NoWorkersRequired(String),

    #[error("analysis '{0}' is done")]
    AnalysisDone(String),

    #[error("resource class mismatch: worker has class {worker_rc}, analysis '{logic_name}' needs class {analysis_rc}")]
    ResourceClassMismatch {
        worker_rc: i64,
        analysis_rc: i64,
        logic_name: String,
    },

    #[error("job {job_id} is {status} and cannot be re-run")]
    JobInFlight { job_id: i64, status: JobStatus },

    #[error("job {job_id} is {status}; pass force to re-run it")]
    JobNeedsForce { job_id: i64, status: JobStatus },

    #[error("job {0} was grabbed by another worker")]
    JobLost(i64),

    #[error("worker {0} is already specialized")]
    AlreadySpecialized(i64),

    #[error("no analysis is ready for resource class {0}")]
    NothingToSpecialize(i64),
}

impl SpecializationError {
    /// The cause of death the rejected worker should be buried with.
    pub fn recommended_cause_of_death(&self) -> CauseOfDeath {
        match self {
            Self::HiveOverloaded { .. } | Self::AnalysisAtCapacity { .. } => {
                CauseOfDeath::HiveOverload
            }
            Self::AnalysisBlocked(_)
            | Self::NoWorkersRequired(_)
            | Self::AnalysisDone(_)
            | Self::NothingToSpecialize(_) => CauseOfDeath::NoWork,
            Self::ResourceClassMismatch { .. }
            | Self::JobInFlight { .. }
            | Self::JobNeedsForce { .. }
            | Self::JobLost(_)
            | Self::AlreadySpecialized(_) => CauseOfDeath::SeeMsg,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueenError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("unknown resource class '{0}'")]
    UnknownResourceClass(String),

    #[error("unknown resource class id {0}")]
    UnknownResourceClassId(i64),

    #[error("could not create worker log directory {}", path.display())]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Specialization(#[from] SpecializationError),
}

/// The coordinator. Cheap to clone; clones share the database pool.
#[derive(Clone)]
pub struct Queen {
    db: Database,
    config: HiveConfig,
}

impl Queen {
    pub fn new(db: Database, config: HiveConfig) -> Self {
        Self { db, config }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &HiveConfig {
        &self.config
    }
}
