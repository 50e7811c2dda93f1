//! Scheduler: decide how many new workers of which resource class to
//! submit to which meadow.
//!
//! One pass walks the candidate analyses in suitability order and lets each
//! exhaust its allowance before the next is considered; fairness across
//! analyses emerges over repeated rounds, not within one. Three budgets are
//! maintained while walking: the caller's submission limit, the per-meadow
//! free-slot ledger, and the fractional hive-load budget.

use std::collections::HashMap;

use tracing::{debug, info};

use super::{Queen, QueenError};
use crate::analysis::{Analysis, AnalysisStatus};
use crate::meadow::Valley;

/// What one scheduling pass decided: worker counts per meadow type and
/// resource class name, plus the grand total.
#[derive(Debug, Default, Clone)]
pub struct SubmissionPlan {
    pub counts: HashMap<String, HashMap<String, i64>>,
    pub total: i64,
}

impl SubmissionPlan {
    fn record(&mut self, meadow_type: &str, rc_name: &str, count: i64) {
        *self
            .counts
            .entry(meadow_type.to_string())
            .or_default()
            .entry(rc_name.to_string())
            .or_insert(0) += count;
        self.total += count;
    }
}

fn min_opt(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) | (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}

impl Queen {
    /// Compute a submission plan.
    ///
    /// `slots_by_meadow` and `pending_by_meadow_rc` are live ledgers: slots
    /// and pending workers consumed by one analysis are no longer available
    /// to the analyses after it, and the mutated ledgers are observable by
    /// the caller after the pass.
    #[allow(clippy::too_many_arguments)]
    pub async fn schedule_workers(
        &self,
        filter_analysis: Option<&Analysis>,
        submit_limit: Option<i64>,
        slots_by_meadow: &mut HashMap<String, Option<i64>>,
        pending_by_meadow_rc: &mut HashMap<String, HashMap<String, i64>>,
        rc_names: &HashMap<i64, String>,
        default_meadow_type: &str,
    ) -> Result<SubmissionPlan, QueenError> {
        let candidates = match filter_analysis {
            Some(analysis) => vec![analysis.clone()],
            None => self.db.fetch_analyses_by_suitability(None).await?,
        };

        let mut plan = SubmissionPlan::default();
        let mut submit_limit = submit_limit;
        let mut available_load = 1.0 - self.db.get_hive_current_load().await?;

        for analysis in &candidates {
            if available_load <= 0.0 {
                debug!(available_load, "hive load budget exhausted; stopping pass");
                break;
            }

            let meadow_type = analysis
                .meadow_type
                .as_deref()
                .unwrap_or(default_meadow_type);
            let meadow_slots = slots_by_meadow
                .get(meadow_type)
                .copied()
                .unwrap_or(Some(0));
            let effective_limit = min_opt(submit_limit, meadow_slots);
            if effective_limit == Some(0) {
                debug!(meadow_type, "no submission room left; stopping pass");
                break;
            }

            let mut stats = self.db.fetch_analysis_stats(analysis.analysis_id).await?;
            if matches!(
                stats.status,
                AnalysisStatus::Loading | AnalysisStatus::Blocked | AnalysisStatus::AllClaimed
            ) {
                stats = self.safe_synchronize_analysis_stats(stats).await?;
            }
            if stats.status == AnalysisStatus::Blocked {
                continue;
            }

            let mut workers = stats.num_required_workers;
            if workers <= 0 {
                continue;
            }
            if let Some(limit) = effective_limit {
                workers = workers.min(limit);
            }
            if let Some(limit) = submit_limit.as_mut() {
                *limit -= workers;
            }

            if stats.hive_capacity > 0 {
                let capacity = stats.hive_capacity as f64;
                let share = (available_load * capacity).floor() as i64;
                workers = workers.min(share);
                if workers <= 0 {
                    continue;
                }
                available_load -= workers as f64 / capacity;
            }

            let Some(rc_name) = rc_names.get(&analysis.resource_class_id) else {
                debug!(
                    analysis = %analysis.logic_name,
                    resource_class_id = analysis.resource_class_id,
                    "analysis has no named resource class; skipping"
                );
                continue;
            };

            // Workers already waiting in this meadow's queue count against
            // the demand, and against the ledger so the next analysis on
            // the same resource class cannot subtract them again.
            if let Some(pending) = pending_by_meadow_rc
                .get_mut(meadow_type)
                .and_then(|by_rc| by_rc.get_mut(rc_name))
            {
                let deducted = workers.min(*pending);
                *pending -= deducted;
                workers -= deducted;
            }
            if workers <= 0 {
                continue;
            }

            plan.record(meadow_type, rc_name, workers);
            if let Some(Some(slots)) = slots_by_meadow.get_mut(meadow_type) {
                *slots = (*slots - workers).max(0);
            }
            debug!(
                analysis = %analysis.logic_name,
                meadow_type,
                resource_class = %rc_name,
                workers,
                "planned worker submission"
            );
        }

        metrics::counter!("apiary_workers_planned_total").increment(plan.total as u64);
        Ok(plan)
    }

    /// Schedule, and when the hive looks idle while work remains, break the
    /// deadlock: stale running-worker counts can make every analysis look
    /// full, so an empty plan with zero load and zero live workers triggers
    /// a garbage-collection pass plus a full resync before recomputing.
    pub async fn schedule_workers_resync_if_necessary(
        &self,
        valley: &Valley,
        filter_analysis: Option<&Analysis>,
    ) -> Result<SubmissionPlan, QueenError> {
        let rc_names = self.db.fetch_resource_class_names().await?;
        let mut slots = valley.get_available_worker_slots_by_meadow_type().await;
        let mut pending = valley.get_pending_worker_counts_by_meadow_type_rc_name().await;

        let plan = self
            .schedule_workers(
                filter_analysis,
                valley.submit_workers_max(),
                &mut slots,
                &mut pending,
                &rc_names,
                valley.default_meadow_type(),
            )
            .await?;
        if plan.total > 0 {
            return Ok(plan);
        }

        let load = self.db.get_hive_current_load().await?;
        let alive = self.db.count_alive_workers().await?;
        if load != 0.0 || alive != 0 {
            return Ok(plan);
        }

        info!("hive looks idle but produced no work; collecting dead workers and resyncing");
        self.check_for_dead_workers(valley, true).await?;
        self.synchronize_hive(filter_analysis).await?;

        let mut slots = valley.get_available_worker_slots_by_meadow_type().await;
        let mut pending = valley.get_pending_worker_counts_by_meadow_type_rc_name().await;
        self.schedule_workers(
            filter_analysis,
            valley.submit_workers_max(),
            &mut slots,
            &mut pending,
            &rc_names,
            valley.default_meadow_type(),
        )
        .await
    }
}
