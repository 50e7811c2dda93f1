//! Apiary - a database-backed workflow orchestration core.
//!
//! A relational store (SQLite or MySQL) is the single source of truth for
//! analyses, jobs, workers, and their aggregate statistics. Worker processes
//! poll the database for work; the coordinator (the [`Queen`]) regulates
//! worker creation, specialization, accounting, garbage collection, and
//! scheduling. Multiple coordinators may run against the same database; the
//! only coordination channel between them is the database itself.
//!
//! ## Components
//!
//! - [`db`]: database layer (SQLite/MySQL behind a small dialect abstraction)
//! - [`Queen`]: worker lifecycle, statistics synchronizer, scheduler
//! - [`meadow`]: compute-backend drivers and the [`Valley`] federation
//! - [`beekeeper`]: the background schedule-and-submit loop
//! - [`profiler`]: historical worker-activity reconstruction

pub mod analysis;
pub mod beekeeper;
pub mod config;
pub mod db;
pub mod job;
pub mod meadow;
pub mod profiler;
pub mod queen;
pub mod worker;

// Configuration
pub use config::HiveConfig;

// Database
pub use db::{Database, DbError, DbResult, Dialect};

// Domain models
pub use analysis::{Analysis, AnalysisStats, AnalysisStatus, NewAnalysis};
pub use job::{Job, JobStatus, NewJob};
pub use worker::{CauseOfDeath, Worker, WorkerOptions, WorkerRegistration, WorkerStatus};

// Meadows
pub use meadow::{LocalMeadow, Meadow, MeadowError, MeadowResult, ProcessStatus, Valley};

// Coordinator
pub use queen::{
    AnalysisRef, DeadWorkerSweep, Queen, QueenError, ResourceClassSelector, SpecializationError,
    SpecializationOutcome, SpecializationTarget, SubmissionPlan,
};

// Beekeeper loop
pub use beekeeper::{spawn_beekeeper, BeekeeperConfig, BeekeeperTask};

// Activity profiler
pub use profiler::{ActivityProfile, TopSelector, WorkerInterval};
