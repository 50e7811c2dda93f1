//! The valley: every meadow one beekeeper can reach, seen as a whole.

use std::collections::HashMap;

use tracing::warn;

use super::{Meadow, MeadowResult};
use crate::worker::Worker;

/// Federation of meadow drivers. Queries that span backends (slot counts,
/// pending counts) are answered here; unreachable meadows are logged and
/// simply left out of the answer.
pub struct Valley {
    meadows: Vec<Box<dyn Meadow>>,
    default_meadow_type: String,
    submit_workers_max: Option<i64>,
}

impl Valley {
    pub fn new(default_meadow_type: impl Into<String>, submit_workers_max: Option<i64>) -> Self {
        Self {
            meadows: Vec::new(),
            default_meadow_type: default_meadow_type.into(),
            submit_workers_max,
        }
    }

    /// An empty valley configured from the hive settings.
    pub fn from_config(config: &crate::config::HiveConfig) -> Self {
        Self::new(
            config.default_meadow_type.clone(),
            config.submit_workers_max,
        )
    }

    pub fn register(&mut self, meadow: Box<dyn Meadow>) {
        self.meadows.push(meadow);
    }

    /// Submission cap per scheduling round, if any.
    pub fn submit_workers_max(&self) -> Option<i64> {
        self.submit_workers_max
    }

    pub fn default_meadow_type(&self) -> &str {
        &self.default_meadow_type
    }

    /// One representative driver per meadow type.
    pub fn available_meadow_hash(&self) -> HashMap<&str, &dyn Meadow> {
        let mut by_type: HashMap<&str, &dyn Meadow> = HashMap::new();
        for meadow in &self.meadows {
            by_type.entry(meadow.meadow_type()).or_insert(meadow.as_ref());
        }
        by_type
    }

    pub fn meadow_of_type(&self, meadow_type: &str) -> Option<&dyn Meadow> {
        self.meadows
            .iter()
            .map(|m| m.as_ref())
            .find(|m| m.meadow_type() == meadow_type)
    }

    pub fn get_default_meadow(&self) -> Option<&dyn Meadow> {
        self.meadow_of_type(&self.default_meadow_type)
    }

    /// The driver responsible for one worker: same type and name if
    /// registered, otherwise any driver of the worker's meadow type.
    pub fn find_available_meadow_responsible_for_worker(
        &self,
        worker: &Worker,
    ) -> Option<&dyn Meadow> {
        self.meadows
            .iter()
            .map(|m| m.as_ref())
            .find(|m| m.meadow_type() == worker.meadow_type && m.name() == worker.meadow_name)
            .or_else(|| self.meadow_of_type(&worker.meadow_type))
    }

    /// Free submission slots per meadow type; `None` means unlimited.
    /// Meadows that fail to answer are omitted.
    pub async fn get_available_worker_slots_by_meadow_type(
        &self,
    ) -> HashMap<String, Option<i64>> {
        let mut slots = HashMap::new();
        for meadow in &self.meadows {
            match meadow.available_worker_slots().await {
                Ok(count) => {
                    let entry = slots
                        .entry(meadow.meadow_type().to_string())
                        .or_insert(Some(0_i64));
                    *entry = match (*entry, count) {
                        (None, _) | (_, None) => None,
                        (Some(a), Some(b)) => Some(a + b),
                    };
                }
                Err(err) => {
                    warn!(
                        meadow_type = meadow.meadow_type(),
                        meadow = meadow.name(),
                        error = %err,
                        "meadow failed to report free slots"
                    );
                }
            }
        }
        slots
    }

    /// Pending (submitted, not yet running) worker counts per meadow type
    /// and resource class name.
    pub async fn get_pending_worker_counts_by_meadow_type_rc_name(
        &self,
    ) -> HashMap<String, HashMap<String, i64>> {
        let mut pending: HashMap<String, HashMap<String, i64>> = HashMap::new();
        for meadow in &self.meadows {
            match meadow.pending_worker_counts().await {
                Ok(counts) => {
                    let by_rc = pending.entry(meadow.meadow_type().to_string()).or_default();
                    for (rc_name, count) in counts {
                        *by_rc.entry(rc_name).or_insert(0) += count;
                    }
                }
                Err(err) => {
                    warn!(
                        meadow_type = meadow.meadow_type(),
                        meadow = meadow.name(),
                        error = %err,
                        "meadow failed to report pending workers"
                    );
                }
            }
        }
        pending
    }

    /// Submit workers through a driver of the given meadow type.
    pub async fn submit_workers(
        &self,
        meadow_type: &str,
        rc_name: &str,
        count: u32,
    ) -> MeadowResult<Vec<String>> {
        match self.meadow_of_type(meadow_type) {
            Some(meadow) => meadow.submit_workers(rc_name, count).await,
            None => Err(super::MeadowError::Unreachable(
                meadow_type.to_string(),
                "no driver of this type is registered".to_string(),
            )),
        }
    }
}
