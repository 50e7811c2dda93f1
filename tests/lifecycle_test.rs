//! Worker lifecycle tests: birth, specialization, death, and the garbage
//! collector, each against a fresh SQLite hive.

mod common;

use anyhow::Result;

use apiary::{
    AnalysisRef, CauseOfDeath, JobStatus, NewJob, QueenError, ResourceClassSelector,
    SpecializationError, SpecializationOutcome, SpecializationTarget, Valley, WorkerOptions,
    WorkerRegistration, WorkerStatus,
};
use common::{seed_analysis, seed_worker, setup_hive, MockMeadow};

fn specialization_error(err: QueenError) -> SpecializationError {
    match err {
        QueenError::Specialization(inner) => inner,
        other => panic!("expected a specialization error, got {other}"),
    }
}

#[tokio::test]
async fn create_new_worker_populates_identity_and_log_dir() -> Result<()> {
    let hive = setup_hive().await?;
    let (_, rc_id) = seed_analysis(&hive.db, "blast", "normal", 10, 1, 0).await?;

    let log_root = tempfile::tempdir()?;
    let registration = WorkerRegistration {
        meadow_type: "LOCAL".to_string(),
        meadow_name: "garden".to_string(),
        host: "testhost".to_string(),
        process_id: "4242".to_string(),
    };
    let worker = hive
        .queen
        .create_new_worker(
            &registration,
            ResourceClassSelector::Name("normal"),
            &WorkerOptions {
                log_root: Some(log_root.path().to_path_buf()),
            },
        )
        .await?;

    assert!(worker.worker_id > 0);
    assert_eq!(worker.meadow_type, "LOCAL");
    assert_eq!(worker.process_id, "4242");
    assert_eq!(worker.resource_class_id, rc_id);
    assert_eq!(worker.status, WorkerStatus::Ready);
    assert!(worker.analysis_id.is_none());
    assert!(worker.died.is_none());

    let log_dir = worker.log_dir.as_deref().expect("log dir recorded");
    assert!(std::path::Path::new(log_dir).is_dir());
    assert!(log_dir.contains(&format!("worker_{}", worker.worker_id)));

    // The row carries the same directory.
    let fetched = hive.db.fetch_worker_by_id(worker.worker_id).await?;
    assert_eq!(fetched.log_dir.as_deref(), Some(log_dir));
    Ok(())
}

#[tokio::test]
async fn unknown_resource_class_is_fatal() -> Result<()> {
    let hive = setup_hive().await?;
    let registration = WorkerRegistration {
        meadow_type: "LOCAL".to_string(),
        meadow_name: "garden".to_string(),
        host: "testhost".to_string(),
        process_id: "1".to_string(),
    };
    let err = hive
        .queen
        .create_new_worker(
            &registration,
            ResourceClassSelector::Name("gigantic"),
            &WorkerOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, QueenError::UnknownResourceClass(name) if name == "gigantic"));
    Ok(())
}

#[tokio::test]
async fn specialization_binds_worker_and_updates_accounting() -> Result<()> {
    let hive = setup_hive().await?;
    let (analysis_id, rc_id) = seed_analysis(&hive.db, "blast", "normal", 10, 2, 10).await?;

    let mut worker = seed_worker(&hive.queen, rc_id, "LOCAL", "100").await?;
    let outcome = hive
        .queen
        .specialize_new_worker(&mut worker, SpecializationTarget::Analysis(AnalysisRef::Id(analysis_id)), false)
        .await?;

    assert!(matches!(outcome, SpecializationOutcome::Scheduled));
    assert_eq!(worker.analysis_id, Some(analysis_id));

    let stats = hive.db.fetch_analysis_stats(analysis_id).await?;
    assert_eq!(stats.status.as_str(), "WORKING");
    assert_eq!(stats.num_running_workers, 1);
    // ceil(10/2) = 5 required before this worker took one slot.
    assert_eq!(stats.num_required_workers, 4);

    // A worker specializes exactly once.
    let err = hive
        .queen
        .specialize_new_worker(&mut worker, SpecializationTarget::Automatic, false)
        .await
        .unwrap_err();
    assert!(matches!(
        specialization_error(err),
        SpecializationError::AlreadySpecialized(_)
    ));
    Ok(())
}

#[tokio::test]
async fn saturated_analysis_refuses_another_worker_with_hive_overload() -> Result<()> {
    let hive = setup_hive().await?;
    let (analysis_id, rc_id) = seed_analysis(&hive.db, "blast", "normal", 1, 1, 2).await?;

    let mut first = seed_worker(&hive.queen, rc_id, "LOCAL", "1").await?;
    hive.queen
        .specialize_new_worker(
            &mut first,
            SpecializationTarget::Analysis(AnalysisRef::LogicName("blast".to_string())),
            false,
        )
        .await?;

    let mut second = seed_worker(&hive.queen, rc_id, "LOCAL", "2").await?;
    let err = hive
        .queen
        .specialize_new_worker(
            &mut second,
            SpecializationTarget::Analysis(AnalysisRef::Id(analysis_id)),
            false,
        )
        .await
        .unwrap_err();

    let rejection = specialization_error(err);
    assert_eq!(
        rejection.recommended_cause_of_death(),
        CauseOfDeath::HiveOverload
    );
    hive.queen
        .register_worker_death(&mut second, Some(rejection.recommended_cause_of_death()))
        .await?;

    let buried = hive.db.fetch_worker_by_id(second.worker_id).await?;
    assert_eq!(buried.cause_of_death, Some(CauseOfDeath::HiveOverload));
    let stats = hive.db.fetch_analysis_stats(analysis_id).await?;
    assert_eq!(stats.num_running_workers, 1);
    Ok(())
}

#[tokio::test]
async fn resource_class_mismatch_is_fatal() -> Result<()> {
    let hive = setup_hive().await?;
    let (analysis_id, _) = seed_analysis(&hive.db, "blast", "normal", 10, 1, 5).await?;
    let other_rc = hive.db.insert_resource_class("huge").await?;

    let mut worker = seed_worker(&hive.queen, other_rc, "LOCAL", "7").await?;
    let err = hive
        .queen
        .specialize_new_worker(
            &mut worker,
            SpecializationTarget::Analysis(AnalysisRef::Id(analysis_id)),
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        specialization_error(err),
        SpecializationError::ResourceClassMismatch { .. }
    ));
    Ok(())
}

#[tokio::test]
async fn rerunning_a_done_job_needs_force_and_reblocks_its_parent() -> Result<()> {
    let hive = setup_hive().await?;
    let (analysis_id, rc_id) = seed_analysis(&hive.db, "blast", "normal", 10, 1, 0).await?;

    // A parent whose semaphore the done child had decremented to zero.
    let parent_id = hive
        .db
        .insert_job(&NewJob {
            analysis_id,
            status: JobStatus::Ready,
            semaphore_count: 0,
            semaphored_job_id: None,
        })
        .await?;
    let child_id = hive
        .db
        .insert_job(&NewJob {
            analysis_id,
            status: JobStatus::Done,
            semaphore_count: 0,
            semaphored_job_id: Some(parent_id),
        })
        .await?;

    let mut worker = seed_worker(&hive.queen, rc_id, "LOCAL", "300").await?;
    let err = hive
        .queen
        .specialize_new_worker(&mut worker, SpecializationTarget::Job(child_id), false)
        .await
        .unwrap_err();
    assert!(matches!(
        specialization_error(err),
        SpecializationError::JobNeedsForce { .. }
    ));

    let outcome = hive
        .queen
        .specialize_new_worker(&mut worker, SpecializationTarget::Job(child_id), true)
        .await?;
    let job = match outcome {
        SpecializationOutcome::SpecialBatch(job) => job,
        SpecializationOutcome::Scheduled => panic!("job-targeted path must return the job"),
    };
    assert_eq!(job.job_id, child_id);
    assert_eq!(job.status, JobStatus::Claimed);
    assert_eq!(job.worker_id, Some(worker.worker_id));
    assert_eq!(worker.analysis_id, Some(analysis_id));

    // The parent is blocked again while the child re-runs.
    let parent = hive.db.fetch_job_by_id(parent_id).await?;
    assert_eq!(parent.status, JobStatus::Semaphored);
    assert_eq!(parent.semaphore_count, 1);
    Ok(())
}

#[tokio::test]
async fn running_jobs_cannot_be_grabbed() -> Result<()> {
    let hive = setup_hive().await?;
    let (analysis_id, rc_id) = seed_analysis(&hive.db, "blast", "normal", 10, 1, 0).await?;
    let job_id = hive
        .db
        .insert_job(&NewJob {
            analysis_id,
            status: JobStatus::Run,
            semaphore_count: 0,
            semaphored_job_id: None,
        })
        .await?;

    let mut worker = seed_worker(&hive.queen, rc_id, "LOCAL", "301").await?;
    let err = hive
        .queen
        .specialize_new_worker(&mut worker, SpecializationTarget::Job(job_id), true)
        .await
        .unwrap_err();
    assert!(matches!(
        specialization_error(err),
        SpecializationError::JobInFlight { .. }
    ));
    Ok(())
}

#[tokio::test]
async fn death_releases_jobs_and_requests_a_replacement() -> Result<()> {
    let hive = setup_hive().await?;
    let (analysis_id, rc_id) = seed_analysis(&hive.db, "blast", "normal", 10, 1, 10).await?;

    let mut worker = seed_worker(&hive.queen, rc_id, "LOCAL", "400").await?;
    hive.queen
        .specialize_new_worker(
            &mut worker,
            SpecializationTarget::Analysis(AnalysisRef::Id(analysis_id)),
            false,
        )
        .await?;

    // The worker picks up a job and starts running it.
    sqlx::query("UPDATE job SET worker_id = ?, status = 'RUN' WHERE job_id = \
                 (SELECT MIN(job_id) FROM job WHERE analysis_id = ?)")
        .bind(worker.worker_id)
        .bind(analysis_id)
        .execute(hive.db.pool())
        .await?;

    worker.work_done = 3;
    hive.queen
        .register_worker_death(&mut worker, Some(CauseOfDeath::Unknown))
        .await?;

    let buried = hive.db.fetch_worker_by_id(worker.worker_id).await?;
    assert_eq!(buried.status, WorkerStatus::Dead);
    assert_eq!(buried.cause_of_death, Some(CauseOfDeath::Unknown));
    assert_eq!(buried.work_done, 3);
    assert!(buried.died.is_some());

    // The in-flight job is back in READY with a bumped retry count.
    let jobs = hive.db.fetch_jobs_for_worker(worker.worker_id).await?;
    assert!(jobs.is_empty(), "dead worker owns nothing");
    let counts = hive.db.count_jobs_by_status(analysis_id).await?;
    assert_eq!(counts.get(&JobStatus::Ready), Some(&10));

    let stats = hive.db.fetch_analysis_stats(analysis_id).await?;
    assert_eq!(stats.num_running_workers, 0);
    // The resync requested workers for the backlog plus one replacement.
    assert!(stats.num_required_workers >= 1);
    Ok(())
}

#[tokio::test]
async fn death_is_idempotent() -> Result<()> {
    let hive = setup_hive().await?;
    let (analysis_id, rc_id) = seed_analysis(&hive.db, "blast", "normal", 10, 1, 5).await?;

    let mut worker = seed_worker(&hive.queen, rc_id, "LOCAL", "500").await?;
    hive.queen
        .specialize_new_worker(
            &mut worker,
            SpecializationTarget::Analysis(AnalysisRef::Id(analysis_id)),
            false,
        )
        .await?;

    hive.queen
        .register_worker_death(&mut worker, Some(CauseOfDeath::Memlimit))
        .await?;
    let stats_after_first = hive.db.fetch_analysis_stats(analysis_id).await?;

    // Burying the same worker again changes nothing.
    hive.queen
        .register_worker_death(&mut worker, Some(CauseOfDeath::Unknown))
        .await?;
    let stats_after_second = hive.db.fetch_analysis_stats(analysis_id).await?;

    let buried = hive.db.fetch_worker_by_id(worker.worker_id).await?;
    assert_eq!(buried.cause_of_death, Some(CauseOfDeath::Memlimit));
    assert_eq!(
        stats_after_first.num_running_workers,
        stats_after_second.num_running_workers
    );
    assert_eq!(
        stats_after_first.num_required_workers,
        stats_after_second.num_required_workers
    );
    Ok(())
}

#[tokio::test]
async fn no_work_death_marks_analysis_all_claimed_before_resync() -> Result<()> {
    let hive = setup_hive().await?;
    // No ready jobs left: the analysis has nothing to offer.
    let (analysis_id, rc_id) = seed_analysis(&hive.db, "blast", "normal", 10, 1, 1).await?;

    let mut worker = seed_worker(&hive.queen, rc_id, "LOCAL", "600").await?;
    hive.queen
        .specialize_new_worker(
            &mut worker,
            SpecializationTarget::Analysis(AnalysisRef::Id(analysis_id)),
            false,
        )
        .await?;
    sqlx::query("UPDATE job SET status = 'DONE' WHERE analysis_id = ?")
        .bind(analysis_id)
        .execute(hive.db.pool())
        .await?;

    hive.queen
        .register_worker_death(&mut worker, Some(CauseOfDeath::NoWork))
        .await?;

    // The post-death resync sees every job finished.
    let stats = hive.db.fetch_analysis_stats(analysis_id).await?;
    assert_eq!(stats.status.as_str(), "DONE");
    assert_eq!(stats.num_running_workers, 0);
    Ok(())
}

#[tokio::test]
async fn round_trip_leaves_running_count_unchanged() -> Result<()> {
    let hive = setup_hive().await?;
    let (analysis_id, rc_id) = seed_analysis(&hive.db, "blast", "normal", 10, 1, 5).await?;
    let before = hive.db.fetch_analysis_stats(analysis_id).await?;

    let mut worker = seed_worker(&hive.queen, rc_id, "LOCAL", "700").await?;
    hive.queen
        .specialize_new_worker(
            &mut worker,
            SpecializationTarget::Analysis(AnalysisRef::Id(analysis_id)),
            false,
        )
        .await?;
    worker.status = WorkerStatus::Run;
    worker.work_done = 1;
    hive.queen.check_in_worker(&worker).await?;
    hive.queen
        .register_worker_death(&mut worker, Some(CauseOfDeath::JobLimit))
        .await?;

    let after = hive.db.fetch_analysis_stats(analysis_id).await?;
    assert_eq!(before.num_running_workers, after.num_running_workers);
    Ok(())
}

#[tokio::test]
async fn check_in_touches_heartbeat_and_counters() -> Result<()> {
    let hive = setup_hive().await?;
    let (_, rc_id) = seed_analysis(&hive.db, "blast", "normal", 10, 1, 0).await?;

    let mut worker = seed_worker(&hive.queen, rc_id, "LOCAL", "800").await?;
    worker.status = WorkerStatus::FetchInput;
    worker.work_done = 12;
    hive.queen.check_in_worker(&worker).await?;

    let fetched = hive.db.fetch_worker_by_id(worker.worker_id).await?;
    assert_eq!(fetched.status, WorkerStatus::FetchInput);
    assert_eq!(fetched.work_done, 12);
    Ok(())
}

// ============================================================================
// Garbage collection
// ============================================================================

#[tokio::test]
async fn gc_buries_vanished_workers_and_releases_their_jobs() -> Result<()> {
    let hive = setup_hive().await?;
    let (analysis_id, rc_id) = seed_analysis(&hive.db, "blast", "normal", 10, 1, 1).await?;

    let mut worker = seed_worker(&hive.queen, rc_id, "LOCAL", "900").await?;
    hive.queen
        .specialize_new_worker(
            &mut worker,
            SpecializationTarget::Analysis(AnalysisRef::Id(analysis_id)),
            false,
        )
        .await?;
    sqlx::query("UPDATE job SET worker_id = ?, status = 'RUN' WHERE analysis_id = ?")
        .bind(worker.worker_id)
        .bind(analysis_id)
        .execute(hive.db.pool())
        .await?;
    sqlx::query("UPDATE worker SET status = 'RUN' WHERE worker_id = ?")
        .bind(worker.worker_id)
        .execute(hive.db.pool())
        .await?;

    // The meadow has no trace of the worker's process.
    let mut valley = Valley::new("LOCAL", Some(50));
    valley.register(Box::new(MockMeadow::empty("LOCAL")));

    let sweep = hive.queen.check_for_dead_workers(&valley, false).await?;
    assert_eq!(sweep.buried, 1);

    let buried = hive.db.fetch_worker_by_id(worker.worker_id).await?;
    assert_eq!(buried.status, WorkerStatus::Dead);
    assert_eq!(buried.cause_of_death, Some(CauseOfDeath::Unknown));

    let counts = hive.db.count_jobs_by_status(analysis_id).await?;
    assert_eq!(counts.get(&JobStatus::Ready), Some(&1));
    let job = hive.db.fetch_job_by_id(1).await?;
    assert_eq!(job.worker_id, None);
    Ok(())
}

#[tokio::test]
async fn gc_uses_post_mortem_causes_when_the_meadow_has_them() -> Result<()> {
    let hive = setup_hive().await?;
    let (analysis_id, rc_id) = seed_analysis(&hive.db, "blast", "normal", 10, 1, 1).await?;

    let mut worker = seed_worker(&hive.queen, rc_id, "LSF", "1234").await?;
    hive.queen
        .specialize_new_worker(
            &mut worker,
            SpecializationTarget::Analysis(AnalysisRef::Id(analysis_id)),
            false,
        )
        .await?;

    let mut meadow = MockMeadow::empty("LSF");
    meadow.post_mortem = true;
    meadow.causes.insert("1234".to_string(), CauseOfDeath::Memlimit);
    let mut valley = Valley::new("LSF", Some(50));
    valley.register(Box::new(meadow));

    hive.queen.check_for_dead_workers(&valley, false).await?;

    let buried = hive.db.fetch_worker_by_id(worker.worker_id).await?;
    assert_eq!(buried.cause_of_death, Some(CauseOfDeath::Memlimit));
    Ok(())
}

#[tokio::test]
async fn gc_leaves_workers_on_unreachable_meadows_alone() -> Result<()> {
    let hive = setup_hive().await?;
    let (_, rc_id) = seed_analysis(&hive.db, "blast", "normal", 10, 1, 1).await?;
    let worker = seed_worker(&hive.queen, rc_id, "LSF", "5555").await?;

    // The valley only reaches LOCAL; the LSF worker's fate is unknown.
    let mut valley = Valley::new("LOCAL", Some(50));
    valley.register(Box::new(MockMeadow::empty("LOCAL")));

    let sweep = hive.queen.check_for_dead_workers(&valley, false).await?;
    assert_eq!(sweep.buried, 0);
    assert_eq!(sweep.skipped_unreachable, 1);

    let untouched = hive.db.fetch_worker_by_id(worker.worker_id).await?;
    assert!(untouched.died.is_none());
    Ok(())
}

#[tokio::test]
async fn gc_running_workers_are_not_buried() -> Result<()> {
    let hive = setup_hive().await?;
    let (_, rc_id) = seed_analysis(&hive.db, "blast", "normal", 10, 1, 1).await?;
    let worker = seed_worker(&hive.queen, rc_id, "LOCAL", "6161").await?;

    let mut meadow = MockMeadow::empty("LOCAL");
    meadow
        .statuses
        .insert("6161".to_string(), apiary::ProcessStatus::Run);
    let mut valley = Valley::new("LOCAL", Some(50));
    valley.register(Box::new(meadow));

    let sweep = hive.queen.check_for_dead_workers(&valley, false).await?;
    assert_eq!(sweep.buried, 0);
    assert!(hive.db.fetch_worker_by_id(worker.worker_id).await?.died.is_none());
    Ok(())
}

#[tokio::test]
async fn buried_in_haste_pass_releases_orphaned_jobs() -> Result<()> {
    let hive = setup_hive().await?;
    let (analysis_id, rc_id) = seed_analysis(&hive.db, "blast", "normal", 10, 1, 2).await?;
    let worker = seed_worker(&hive.queen, rc_id, "LOCAL", "7171").await?;

    // Someone marked the worker DEAD without releasing its job.
    sqlx::query(
        "UPDATE worker SET status = 'DEAD', died = CURRENT_TIMESTAMP, analysis_id = ? \
         WHERE worker_id = ?",
    )
    .bind(analysis_id)
    .bind(worker.worker_id)
    .execute(hive.db.pool())
    .await?;
    sqlx::query(
        "UPDATE job SET worker_id = ?, status = 'RUN' \
         WHERE job_id = (SELECT MIN(job_id) FROM job WHERE analysis_id = ?)",
    )
    .bind(worker.worker_id)
    .bind(analysis_id)
    .execute(hive.db.pool())
    .await?;

    let mut valley = Valley::new("LOCAL", Some(50));
    valley.register(Box::new(MockMeadow::empty("LOCAL")));

    // Without the integrity pass the job stays orphaned.
    let sweep = hive.queen.check_for_dead_workers(&valley, false).await?;
    assert_eq!(sweep.jobs_released, 0);

    let sweep = hive.queen.check_for_dead_workers(&valley, true).await?;
    assert_eq!(sweep.jobs_released, 1);
    let counts = hive.db.count_jobs_by_status(analysis_id).await?;
    assert_eq!(counts.get(&JobStatus::Ready), Some(&2));
    Ok(())
}
