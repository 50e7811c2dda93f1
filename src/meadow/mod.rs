//! Compute-backend drivers ("meadows") and their federation (the valley).
//!
//! Meadows vary in capability: every driver can report the status of the
//! processes it submitted, but only some can explain *why* a vanished
//! process died. Optional capabilities are modelled as explicit `supports_*`
//! predicates that callers must consult before invoking the guarded method.

mod local;
mod valley;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

pub use local::LocalMeadow;
pub use valley::Valley;

use crate::worker::CauseOfDeath;

#[derive(Debug, Error)]
pub enum MeadowError {
    #[error("meadow '{0}' is unreachable: {1}")]
    Unreachable(String, String),

    #[error("meadow does not support {0}")]
    Unsupported(&'static str),

    #[error("submission failed: {0}")]
    Submission(#[from] std::io::Error),
}

pub type MeadowResult<T> = Result<T, MeadowError>;

/// Status of a submitted worker process as seen by its meadow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Run,
    Pend,
    Suspended,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Run => "RUN",
            Self::Pend => "PEND",
            Self::Suspended => "SUSPENDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUN" => Some(Self::Run),
            "PEND" => Some(Self::Pend),
            "SUSPENDED" => Some(Self::Suspended),
            _ => None,
        }
    }
}

/// One compute backend capable of running workers.
#[async_trait]
pub trait Meadow: Send + Sync {
    /// Backend family, e.g. "LSF" or "LOCAL". Matches `worker.meadow_type`.
    fn meadow_type(&self) -> &str;

    /// Instance name within the family. Matches `worker.meadow_name`.
    fn name(&self) -> &str;

    /// Whether [`Meadow::find_out_causes`] is implemented.
    fn supports_post_mortem(&self) -> bool {
        false
    }

    /// Status of every worker process this meadow knows about, keyed by
    /// process id. A process absent from the map is gone.
    async fn status_of_all_our_workers(&self) -> MeadowResult<HashMap<String, ProcessStatus>>;

    /// Post-mortem causes for the given process ids. Only meaningful when
    /// [`Meadow::supports_post_mortem`] returns true.
    async fn find_out_causes(
        &self,
        _process_ids: &[String],
    ) -> MeadowResult<HashMap<String, CauseOfDeath>> {
        Err(MeadowError::Unsupported("post-mortem cause lookup"))
    }

    /// Submit `count` workers of the given resource class; returns the
    /// process ids of what was submitted.
    async fn submit_workers(&self, rc_name: &str, count: u32) -> MeadowResult<Vec<String>>;

    /// Workers submitted but not yet running, per resource class name.
    async fn pending_worker_counts(&self) -> MeadowResult<HashMap<String, i64>>;

    /// Free submission slots; `None` means unlimited.
    async fn available_worker_slots(&self) -> MeadowResult<Option<i64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_status_roundtrip() {
        for status in [ProcessStatus::Run, ProcessStatus::Pend, ProcessStatus::Suspended] {
            assert_eq!(ProcessStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ProcessStatus::parse("ZOMBIE"), None);
    }
}
