//! LOCAL meadow: workers are plain child processes on this host.
//!
//! Submission spawns the configured worker command; liveness is answered
//! from `/proc`, so this driver is Linux-only. There is no submission queue
//! (a spawned process starts immediately) and no post-mortem facility.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{Meadow, MeadowError, MeadowResult, ProcessStatus};

pub struct LocalMeadow {
    name: String,
    /// argv of the worker process to spawn; the resource class name is
    /// passed through the APIARY_RESOURCE_CLASS environment variable.
    worker_command: Vec<String>,
    total_slots: i64,
    submitted_pids: Mutex<Vec<u32>>,
}

impl LocalMeadow {
    pub fn new(name: impl Into<String>, worker_command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            worker_command,
            total_slots: num_cpus::get() as i64,
            submitted_pids: Mutex::new(Vec::new()),
        }
    }

    pub fn with_total_slots(mut self, total_slots: i64) -> Self {
        self.total_slots = total_slots;
        self
    }

    fn live_pids(&self) -> Vec<u32> {
        let mut pids = self.submitted_pids.lock().expect("pid list poisoned");
        pids.retain(|pid| Path::new(&format!("/proc/{pid}")).exists());
        pids.clone()
    }
}

#[async_trait]
impl Meadow for LocalMeadow {
    fn meadow_type(&self) -> &str {
        "LOCAL"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn status_of_all_our_workers(&self) -> MeadowResult<HashMap<String, ProcessStatus>> {
        Ok(self
            .live_pids()
            .into_iter()
            .map(|pid| (pid.to_string(), ProcessStatus::Run))
            .collect())
    }

    async fn submit_workers(&self, rc_name: &str, count: u32) -> MeadowResult<Vec<String>> {
        let (program, args) = self
            .worker_command
            .split_first()
            .ok_or(MeadowError::Unsupported("empty worker command"))?;

        let mut spawned = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let child = Command::new(program)
                .args(args)
                .env("APIARY_RESOURCE_CLASS", rc_name)
                .spawn()?;
            let Some(pid) = child.id() else {
                debug!("spawned worker exited before a pid could be read");
                continue;
            };
            self.submitted_pids
                .lock()
                .expect("pid list poisoned")
                .push(pid);
            spawned.push(pid.to_string());
        }
        info!(
            meadow = %self.name,
            resource_class = rc_name,
            count = spawned.len(),
            "submitted local workers"
        );
        Ok(spawned)
    }

    async fn pending_worker_counts(&self) -> MeadowResult<HashMap<String, i64>> {
        // Local processes start immediately; nothing ever queues.
        Ok(HashMap::new())
    }

    async fn available_worker_slots(&self) -> MeadowResult<Option<i64>> {
        let in_use = self.live_pids().len() as i64;
        Ok(Some((self.total_slots - in_use).max(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_meadow_has_all_slots_and_no_workers() {
        let meadow = LocalMeadow::new("garden", vec!["true".to_string()]).with_total_slots(4);
        assert_eq!(meadow.meadow_type(), "LOCAL");
        assert!(!meadow.supports_post_mortem());
        assert_eq!(meadow.available_worker_slots().await.unwrap(), Some(4));
        assert!(meadow.status_of_all_our_workers().await.unwrap().is_empty());
        assert!(meadow.pending_worker_counts().await.unwrap().is_empty());
    }
}
