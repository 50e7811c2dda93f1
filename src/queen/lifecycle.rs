//! Worker lifecycle: birth, specialization, check-in, death, and the
//! garbage collector that finds workers whose processes have vanished.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{Queen, QueenError, SpecializationError};
use crate::analysis::{Analysis, AnalysisStats, AnalysisStatus};
use crate::job::Job;
use crate::meadow::Valley;
use crate::worker::{CauseOfDeath, Worker, WorkerOptions, WorkerRegistration, WorkerStatus};

/// Hive load at or above this refuses new specializations.
const HIVE_OVERLOAD_FACTOR: f64 = 1.1;

/// How a new worker picks its analysis.
#[derive(Debug, Clone)]
pub enum SpecializationTarget {
    /// Let the scheduler pick the most suitable analysis for the worker's
    /// resource class.
    Automatic,
    /// Bind to one analysis.
    Analysis(AnalysisRef),
    /// Re-run one specific job, bypassing scheduler accounting.
    Job(i64),
}

/// An analysis named by id or by logic name.
#[derive(Debug, Clone)]
pub enum AnalysisRef {
    Id(i64),
    LogicName(String),
}

/// A resource class named by id or by name.
#[derive(Debug, Clone)]
pub enum ResourceClassSelector<'a> {
    Id(i64),
    Name(&'a str),
}

/// What specialization produced: either the worker was folded into normal
/// scheduler accounting, or it carries one pre-grabbed job as a special
/// batch outside that accounting.
#[derive(Debug)]
pub enum SpecializationOutcome {
    Scheduled,
    SpecialBatch(Job),
}

/// Tally of one garbage-collection pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeadWorkerSweep {
    pub checked: usize,
    pub skipped_unreachable: usize,
    pub buried: usize,
    pub jobs_released: u64,
}

/// Fan a worker's log directory out under `root` so no single directory
/// accumulates millions of siblings.
fn worker_log_dir(root: &Path, worker_id: i64) -> PathBuf {
    root.join(format!("{:03}", worker_id % 1000))
        .join(format!("worker_{worker_id}"))
}

impl Queen {
    /// Register a newborn worker. The database assigns the id; the log
    /// directory (when requested) is created and recorded before the handle
    /// is returned. Any failure fails the whole call.
    pub async fn create_new_worker(
        &self,
        registration: &WorkerRegistration,
        resource_class: ResourceClassSelector<'_>,
        options: &WorkerOptions,
    ) -> Result<Worker, QueenError> {
        let resource_class_id = match resource_class {
            ResourceClassSelector::Id(id) => {
                self.db
                    .fetch_resource_class_name_by_id(id)
                    .await?
                    .ok_or(QueenError::UnknownResourceClassId(id))?;
                id
            }
            ResourceClassSelector::Name(name) => self
                .db
                .fetch_resource_class_id_by_name(name)
                .await?
                .ok_or_else(|| QueenError::UnknownResourceClass(name.to_string()))?,
        };

        let worker_id = self.db.insert_worker(registration, resource_class_id).await?;
        let mut worker = self.db.fetch_worker_by_id(worker_id).await?;

        let log_root = options
            .log_root
            .as_ref()
            .or(self.config.worker_log_root.as_ref());
        if let Some(root) = log_root {
            let dir = worker_log_dir(root, worker_id);
            if let Err(source) = tokio::fs::create_dir_all(&dir).await {
                // No partial registration: take the row back out.
                if let Err(db_err) = self.db.delete_worker(worker_id).await {
                    warn!(worker_id, error = %db_err, "could not roll back worker row");
                }
                return Err(QueenError::LogDir { path: dir, source });
            }
            let dir_str = dir.to_string_lossy().into_owned();
            self.db.update_worker_log_dir(worker_id, &dir_str).await?;
            worker.log_dir = Some(dir_str);
        }

        info!(
            worker_id,
            meadow_type = %registration.meadow_type,
            meadow = %registration.meadow_name,
            host = %registration.host,
            process_id = %registration.process_id,
            "worker registered"
        );
        Ok(worker)
    }

    /// Bind a freshly created worker to exactly one analysis.
    pub async fn specialize_new_worker(
        &self,
        worker: &mut Worker,
        target: SpecializationTarget,
        force: bool,
    ) -> Result<SpecializationOutcome, QueenError> {
        if worker.analysis_id.is_some() {
            return Err(SpecializationError::AlreadySpecialized(worker.worker_id).into());
        }

        let outcome = match target {
            SpecializationTarget::Job(job_id) => {
                let job = self.grab_job_for_worker(worker, job_id, force).await?;
                let analysis = self.db.fetch_analysis_by_id(job.analysis_id).await?;
                self.bind_worker(worker, &analysis).await?;
                SpecializationOutcome::SpecialBatch(job)
            }
            SpecializationTarget::Analysis(analysis_ref) => {
                let analysis = match analysis_ref {
                    AnalysisRef::Id(id) => self.db.fetch_analysis_by_id(id).await?,
                    AnalysisRef::LogicName(name) => {
                        self.db.fetch_analysis_by_logic_name(&name).await?
                    }
                };
                if analysis.resource_class_id != worker.resource_class_id {
                    return Err(SpecializationError::ResourceClassMismatch {
                        worker_rc: worker.resource_class_id,
                        analysis_rc: analysis.resource_class_id,
                        logic_name: analysis.logic_name.clone(),
                    }
                    .into());
                }
                let stats = self.db.fetch_analysis_stats(analysis.analysis_id).await?;
                let stats = self.safe_synchronize_analysis_stats(stats).await?;
                if !force {
                    self.reject_unschedulable(&analysis, &stats).await?;
                }
                self.bind_worker(worker, &analysis).await?;
                self.account_scheduled_specialization(&analysis).await?;
                SpecializationOutcome::Scheduled
            }
            SpecializationTarget::Automatic => {
                let analysis = self
                    .suggest_analysis_to_specialize_by_rc_id(worker.resource_class_id)
                    .await?
                    .ok_or(SpecializationError::NothingToSpecialize(
                        worker.resource_class_id,
                    ))?;
                self.bind_worker(worker, &analysis).await?;
                self.account_scheduled_specialization(&analysis).await?;
                SpecializationOutcome::Scheduled
            }
        };

        info!(
            worker_id = worker.worker_id,
            analysis_id = worker.analysis_id,
            special_batch = matches!(outcome, SpecializationOutcome::SpecialBatch(_)),
            "worker specialized"
        );
        Ok(outcome)
    }

    /// Path A: fetch, validate, and atomically grab one job. Re-running a
    /// DONE job re-increments its parent's semaphore first, so the parent
    /// stays blocked while the child runs again.
    async fn grab_job_for_worker(
        &self,
        worker: &Worker,
        job_id: i64,
        force: bool,
    ) -> Result<Job, QueenError> {
        use crate::job::JobStatus;

        let job = self.db.fetch_job_by_id(job_id).await?;
        if job.status.is_in_flight() {
            return Err(SpecializationError::JobInFlight {
                job_id,
                status: job.status,
            }
            .into());
        }
        if matches!(job.status, JobStatus::Done | JobStatus::Semaphored) && !force {
            return Err(SpecializationError::JobNeedsForce {
                job_id,
                status: job.status,
            }
            .into());
        }
        if job.status == JobStatus::Done {
            if let Some(parent_id) = job.semaphored_job_id {
                self.db.increase_semaphore_count_for_job(parent_id, 1).await?;
                debug!(job_id, parent_id, "re-blocked parent semaphore for re-run");
            }
        }
        if !self.db.reset_or_grab_job(job_id, worker.worker_id, force).await? {
            return Err(SpecializationError::JobLost(job_id).into());
        }
        self.db.fetch_job_by_id(job_id).await.map_err(Into::into)
    }

    /// Path B gatekeeping: a non-forced specialization is refused when the
    /// hive is overloaded or the analysis cannot take another worker.
    async fn reject_unschedulable(
        &self,
        analysis: &Analysis,
        stats: &AnalysisStats,
    ) -> Result<(), QueenError> {
        let load = self.db.get_hive_current_load().await?;
        if load >= HIVE_OVERLOAD_FACTOR {
            return Err(SpecializationError::HiveOverloaded { load }.into());
        }
        match stats.status {
            AnalysisStatus::Blocked => {
                Err(SpecializationError::AnalysisBlocked(analysis.logic_name.clone()).into())
            }
            AnalysisStatus::Done => {
                Err(SpecializationError::AnalysisDone(analysis.logic_name.clone()).into())
            }
            _ if stats.num_required_workers <= 0 => {
                // An analysis saturated with its own workers overloads like
                // a full hive; one that simply has nothing ready does not.
                if stats.hive_capacity > 0 && stats.num_running_workers >= stats.hive_capacity {
                    Err(SpecializationError::AnalysisAtCapacity {
                        logic_name: analysis.logic_name.clone(),
                        capacity: stats.hive_capacity,
                    }
                    .into())
                } else {
                    Err(SpecializationError::NoWorkersRequired(analysis.logic_name.clone()).into())
                }
            }
            _ => Ok(()),
        }
    }

    /// Path C: the first suitable analysis for this resource class that is
    /// not blocked and still wants workers.
    async fn suggest_analysis_to_specialize_by_rc_id(
        &self,
        resource_class_id: i64,
    ) -> Result<Option<Analysis>, QueenError> {
        for analysis in self
            .db
            .fetch_analyses_by_suitability(Some(resource_class_id))
            .await?
        {
            let stats = self.db.fetch_analysis_stats(analysis.analysis_id).await?;
            let stats = self.safe_synchronize_analysis_stats(stats).await?;
            if stats.status != AnalysisStatus::Blocked && stats.num_required_workers > 0 {
                return Ok(Some(analysis));
            }
        }
        Ok(None)
    }

    async fn bind_worker(&self, worker: &mut Worker, analysis: &Analysis) -> Result<(), QueenError> {
        self.db
            .update_worker_analysis(worker.worker_id, analysis.analysis_id)
            .await?;
        worker.analysis_id = Some(analysis.analysis_id);
        if !self.db.hive_uses_triggers() {
            self.db.increase_running_workers(analysis.analysis_id).await?;
        }
        Ok(())
    }

    /// Scheduler accounting for paths B and C: the analysis is now WORKING
    /// and wants one fewer worker. Special batches skip this.
    async fn account_scheduled_specialization(&self, analysis: &Analysis) -> Result<(), QueenError> {
        self.db
            .update_analysis_status(analysis.analysis_id, AnalysisStatus::Working)
            .await?;
        self.db.decrease_required_workers(analysis.analysis_id).await?;
        Ok(())
    }

    /// Record a periodic check-in for a live worker. Idempotent.
    pub async fn check_in_worker(&self, worker: &Worker) -> Result<(), QueenError> {
        self.db
            .check_in_worker(worker.worker_id, worker.status, worker.work_done)
            .await?;
        Ok(())
    }

    /// Bury a worker. The row update is guarded, so a second burial of the
    /// same worker changes nothing. Post-death bookkeeping follows the
    /// cause: orderly NO_WORK deaths flip the analysis to ALL_CLAIMED,
    /// disorderly ones give the worker's jobs back, and the analysis is
    /// resynced with one replacement worker requested unless it is DONE.
    pub async fn register_worker_death(
        &self,
        worker: &mut Worker,
        cause: Option<CauseOfDeath>,
    ) -> Result<(), QueenError> {
        let cause = cause
            .or(worker.cause_of_death)
            .unwrap_or(CauseOfDeath::Unknown);

        let updated = self
            .db
            .record_worker_death(worker.worker_id, worker.work_done, cause)
            .await?;
        if updated == 0 {
            debug!(worker_id = worker.worker_id, "worker already buried");
            return Ok(());
        }
        worker.status = WorkerStatus::Dead;
        worker.cause_of_death = Some(cause);

        info!(
            worker_id = worker.worker_id,
            cause = %cause,
            work_done = worker.work_done,
            "worker death registered"
        );

        let Some(analysis_id) = worker.analysis_id else {
            return Ok(());
        };

        if !self.db.hive_uses_triggers() {
            self.db.decrease_running_workers(analysis_id).await?;
        }
        if cause == CauseOfDeath::NoWork {
            self.db
                .update_analysis_status(analysis_id, AnalysisStatus::AllClaimed)
                .await?;
        }
        if cause.releases_jobs() {
            let released = self
                .db
                .release_undone_jobs_from_worker(worker.worker_id)
                .await?;
            if released > 0 {
                info!(
                    worker_id = worker.worker_id,
                    released, "released jobs of dead worker"
                );
            }
        }

        let stats = self.db.fetch_analysis_stats(analysis_id).await?;
        let stats = self.safe_synchronize_analysis_stats(stats).await?;
        // The sync above still counted this worker among the living when it
        // clamped by capacity, so one replacement must be requested.
        if stats.status != AnalysisStatus::Done {
            self.db.increase_required_workers(analysis_id, 1).await?;
        }
        Ok(())
    }

    /// The garbage collector: compare every non-DEAD worker row against
    /// what its meadow reports, and bury the ones whose process is gone.
    ///
    /// Workers on meadows this valley cannot reach are skipped; absence of
    /// evidence is not evidence of death. With `also_check_buried_in_haste`
    /// an extra integrity pass releases non-terminal jobs still owned by
    /// already-DEAD workers.
    pub async fn check_for_dead_workers(
        &self,
        valley: &Valley,
        also_check_buried_in_haste: bool,
    ) -> Result<DeadWorkerSweep, QueenError> {
        let workers = self.db.fetch_all_non_dead_workers().await?;
        let mut sweep = DeadWorkerSweep {
            checked: workers.len(),
            ..DeadWorkerSweep::default()
        };

        let mut by_type: HashMap<String, Vec<Worker>> = HashMap::new();
        for worker in workers {
            by_type.entry(worker.meadow_type.clone()).or_default().push(worker);
        }

        let meadows = valley.available_meadow_hash();
        for (meadow_type, group) in by_type {
            let Some(meadow) = meadows.get(meadow_type.as_str()) else {
                warn!(
                    meadow_type = %meadow_type,
                    workers = group.len(),
                    "meadow unreachable; leaving its workers untouched"
                );
                sweep.skipped_unreachable += group.len();
                continue;
            };

            let status_map = match meadow.status_of_all_our_workers().await {
                Ok(map) => map,
                Err(err) => {
                    warn!(
                        meadow_type = %meadow_type,
                        error = %err,
                        "meadow failed to report worker statuses; skipping"
                    );
                    sweep.skipped_unreachable += group.len();
                    continue;
                }
            };

            let lost: Vec<Worker> = group
                .into_iter()
                .filter(|w| !status_map.contains_key(&w.process_id))
                .collect();
            if lost.is_empty() {
                continue;
            }

            let causes = if meadow.supports_post_mortem() {
                let pids: Vec<String> = lost.iter().map(|w| w.process_id.clone()).collect();
                match meadow.find_out_causes(&pids).await {
                    Ok(causes) => causes,
                    Err(err) => {
                        warn!(meadow_type = %meadow_type, error = %err, "post-mortem lookup failed");
                        HashMap::new()
                    }
                }
            } else {
                HashMap::new()
            };

            for mut worker in lost {
                let cause = causes
                    .get(&worker.process_id)
                    .copied()
                    .unwrap_or(CauseOfDeath::Unknown);
                self.register_worker_death(&mut worker, Some(cause)).await?;
                sweep.buried += 1;
            }
        }

        if also_check_buried_in_haste {
            sweep.jobs_released = self.db.release_jobs_buried_in_haste().await?;
            if sweep.jobs_released > 0 {
                info!(
                    jobs_released = sweep.jobs_released,
                    "released jobs of workers buried in haste"
                );
            }
        }

        metrics::counter!("apiary_workers_buried_total").increment(sweep.buried as u64);
        Ok(sweep)
    }
}
