//! Job model: one unit of work, owned by at most one worker at a time.

/// Status of a job, as persisted in `job.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Ready,
    Semaphored,
    Claimed,
    PreCleanup,
    FetchInput,
    Run,
    WriteOutput,
    PostCleanup,
    Done,
    Failed,
    PassedOn,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Semaphored => "SEMAPHORED",
            Self::Claimed => "CLAIMED",
            Self::PreCleanup => "PRE_CLEANUP",
            Self::FetchInput => "FETCH_INPUT",
            Self::Run => "RUN",
            Self::WriteOutput => "WRITE_OUTPUT",
            Self::PostCleanup => "POST_CLEANUP",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::PassedOn => "PASSED_ON",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "READY" => Some(Self::Ready),
            "SEMAPHORED" => Some(Self::Semaphored),
            "CLAIMED" => Some(Self::Claimed),
            "PRE_CLEANUP" => Some(Self::PreCleanup),
            "FETCH_INPUT" => Some(Self::FetchInput),
            "RUN" => Some(Self::Run),
            "WRITE_OUTPUT" => Some(Self::WriteOutput),
            "POST_CLEANUP" => Some(Self::PostCleanup),
            "DONE" => Some(Self::Done),
            "FAILED" => Some(Self::Failed),
            "PASSED_ON" => Some(Self::PassedOn),
            _ => None,
        }
    }

    /// Statuses that mean a worker currently holds the job.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Claimed
                | Self::PreCleanup
                | Self::FetchInput
                | Self::Run
                | Self::WriteOutput
                | Self::PostCleanup
        )
    }

    /// Statuses no worker needs to touch again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::PassedOn)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory handle for one job row.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: i64,
    pub analysis_id: i64,
    pub worker_id: Option<i64>,
    pub status: JobStatus,
    pub retry_count: i64,
    /// Number of child jobs still blocking this one; the job stays
    /// SEMAPHORED while this is above zero.
    pub semaphore_count: i64,
    /// Parent job whose semaphore this job decrements on completion.
    pub semaphored_job_id: Option<i64>,
}

/// Parameters for seeding a new job row.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub analysis_id: i64,
    pub status: JobStatus,
    pub semaphore_count: i64,
    pub semaphored_job_id: Option<i64>,
}

impl NewJob {
    pub fn ready(analysis_id: i64) -> Self {
        Self {
            analysis_id,
            status: JobStatus::Ready,
            semaphore_count: 0,
            semaphored_job_id: None,
        }
    }
}
