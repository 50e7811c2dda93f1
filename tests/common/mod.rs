//! Shared helpers for integration tests: each test gets its own
//! tempfile-backed SQLite database with a freshly deployed schema.
//!
//! Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::HashMap;

use anyhow::Result;
use tempfile::TempDir;

use apiary::db::schema;
use apiary::{
    Database, HiveConfig, Meadow, MeadowResult, NewAnalysis, NewJob, ProcessStatus, Queen,
    ResourceClassSelector, Worker, WorkerOptions, WorkerRegistration,
};

/// A hive on its own temporary database. The TempDir must outlive the
/// connections, so keep the whole struct alive for the test's duration.
pub struct TestHive {
    pub queen: Queen,
    pub db: Database,
    #[allow(dead_code)]
    dir: TempDir,
}

pub async fn setup_hive() -> Result<TestHive> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("hive.db").display());
    let db = Database::connect(&url).await?;
    schema::deploy(&db).await?;
    let config = HiveConfig::new(&url);
    let queen = Queen::new(db.clone(), config);
    Ok(TestHive { queen, db, dir })
}

/// Register a resource class, an analysis with the given capacity and batch
/// size, and `ready_jobs` READY jobs. Returns (analysis_id, rc_id).
pub async fn seed_analysis(
    db: &Database,
    logic_name: &str,
    rc_name: &str,
    hive_capacity: i64,
    batch_size: i64,
    ready_jobs: usize,
) -> Result<(i64, i64)> {
    let rc_id = match db.fetch_resource_class_id_by_name(rc_name).await? {
        Some(id) => id,
        None => db.insert_resource_class(rc_name).await?,
    };
    let mut new = NewAnalysis::new(logic_name, rc_id);
    new.hive_capacity = hive_capacity;
    new.batch_size = batch_size;
    let analysis_id = db.insert_analysis(&new).await?;
    for _ in 0..ready_jobs {
        db.insert_job(&NewJob::ready(analysis_id)).await?;
    }
    Ok((analysis_id, rc_id))
}

/// Create one worker on the given meadow with a unique process id.
pub async fn seed_worker(
    queen: &Queen,
    rc_id: i64,
    meadow_type: &str,
    process_id: &str,
) -> Result<Worker> {
    let registration = WorkerRegistration {
        meadow_type: meadow_type.to_string(),
        meadow_name: format!("{meadow_type}_test"),
        host: "testhost".to_string(),
        process_id: process_id.to_string(),
    };
    let worker = queen
        .create_new_worker(
            &registration,
            ResourceClassSelector::Id(rc_id),
            &WorkerOptions::default(),
        )
        .await?;
    Ok(worker)
}

/// A meadow driver whose process table the test controls directly.
pub struct MockMeadow {
    pub meadow_type: String,
    pub statuses: HashMap<String, ProcessStatus>,
    pub causes: HashMap<String, apiary::CauseOfDeath>,
    pub post_mortem: bool,
    pub slots: Option<i64>,
    pub pending: HashMap<String, i64>,
}

impl MockMeadow {
    pub fn empty(meadow_type: &str) -> Self {
        Self {
            meadow_type: meadow_type.to_string(),
            statuses: HashMap::new(),
            causes: HashMap::new(),
            post_mortem: false,
            slots: Some(100),
            pending: HashMap::new(),
        }
    }
}

#[async_trait::async_trait]
impl Meadow for MockMeadow {
    fn meadow_type(&self) -> &str {
        &self.meadow_type
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn supports_post_mortem(&self) -> bool {
        self.post_mortem
    }

    async fn status_of_all_our_workers(&self) -> MeadowResult<HashMap<String, ProcessStatus>> {
        Ok(self.statuses.clone())
    }

    async fn find_out_causes(
        &self,
        process_ids: &[String],
    ) -> MeadowResult<HashMap<String, apiary::CauseOfDeath>> {
        Ok(process_ids
            .iter()
            .filter_map(|pid| self.causes.get(pid).map(|c| (pid.clone(), *c)))
            .collect())
    }

    async fn submit_workers(&self, _rc_name: &str, count: u32) -> MeadowResult<Vec<String>> {
        Ok((0..count).map(|i| format!("mock_{i}")).collect())
    }

    async fn pending_worker_counts(&self) -> MeadowResult<HashMap<String, i64>> {
        Ok(self.pending.clone())
    }

    async fn available_worker_slots(&self) -> MeadowResult<Option<i64>> {
        Ok(self.slots)
    }
}
