//! Activity profiler: reconstruct per-analysis worker concurrency over a
//! time range from historical birth/death timestamps.
//!
//! The math is pure and operates on epoch seconds: for each bucket
//! `[d1, d2)` and analysis, the average number of concurrent workers is the
//! summed overlap of that analysis' worker lifetimes with the bucket,
//! divided by the bucket width.

pub mod render;

use std::collections::HashMap;
use std::str::FromStr;

/// Fixed palette used when no configuration overrides it.
pub const DEFAULT_PALETTE: [&str; 20] = [
    "#1f77b4", "#aec7e8", "#ff7f0e", "#ffbb78", "#2ca02c", "#98df8a", "#d62728", "#ff9896",
    "#9467bd", "#c5b0d5", "#8c564b", "#c49c94", "#e377c2", "#f7b6d2", "#7f7f7f", "#c7c7c7",
    "#bcbd22", "#dbdb8d", "#17becf", "#9edae5",
];

/// Series name the below-the-cut analyses are folded into.
pub const OTHER_SERIES: &str = "OTHER";

/// One worker's lifetime, joined to its analysis.
#[derive(Debug, Clone)]
pub struct WorkerInterval {
    pub analysis_id: i64,
    pub logic_name: String,
    /// Birth, epoch seconds.
    pub born: i64,
    /// Death, epoch seconds; `None` while the worker is still alive.
    pub died: Option<i64>,
}

/// How many of the ranked series to keep: a count, or a fraction of the
/// total worker-time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TopSelector {
    Count(usize),
    Fraction(f64),
}

impl FromStr for TopSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(count) = s.parse::<usize>() {
            if count == 0 {
                return Err("top count must be positive".to_string());
            }
            return Ok(Self::Count(count));
        }
        match s.parse::<f64>() {
            Ok(fraction) if fraction > 0.0 && fraction < 1.0 => Ok(Self::Fraction(fraction)),
            Ok(_) => Err(format!("top fraction must be in (0, 1): {s}")),
            Err(_) => Err(format!("cannot parse top selector: {s}")),
        }
    }
}

/// One analysis' bucketed concurrency values.
#[derive(Debug, Clone)]
pub struct AnalysisSeries {
    pub logic_name: String,
    pub values: Vec<f64>,
    pub total_worker_seconds: f64,
}

/// The reconstructed activity profile: bucket boundaries plus one series
/// per analysis, ranked by total worker-time descending.
#[derive(Debug, Clone)]
pub struct ActivityProfile {
    /// Start of each bucket, epoch seconds.
    pub bucket_starts: Vec<i64>,
    pub granularity_secs: i64,
    pub series: Vec<AnalysisSeries>,
}

impl ActivityProfile {
    /// Sum across all series for one bucket.
    pub fn bucket_total(&self, bucket: usize) -> f64 {
        self.series.iter().map(|s| s.values[bucket]).sum()
    }
}

/// Build the bucketed profile over `[start, end)`. Workers still alive are
/// counted up to infinity, clipped by each bucket's end.
pub fn build_profile(
    intervals: &[WorkerInterval],
    start: i64,
    end: i64,
    granularity_minutes: u32,
) -> ActivityProfile {
    let granularity_secs = i64::from(granularity_minutes.max(1)) * 60;
    let mut bucket_starts = Vec::new();
    let mut t = start;
    while t < end {
        bucket_starts.push(t);
        t += granularity_secs;
    }

    let mut by_name: HashMap<String, Vec<f64>> = HashMap::new();
    for interval in intervals {
        let values = by_name
            .entry(interval.logic_name.clone())
            .or_insert_with(|| vec![0.0; bucket_starts.len()]);
        let died = interval.died.unwrap_or(i64::MAX);
        for (bucket, &d1) in bucket_starts.iter().enumerate() {
            let d2 = d1 + granularity_secs;
            let overlap = died.min(d2) - interval.born.max(d1);
            if overlap > 0 {
                values[bucket] += overlap as f64 / granularity_secs as f64;
            }
        }
    }

    let mut series: Vec<AnalysisSeries> = by_name
        .into_iter()
        .map(|(logic_name, values)| {
            let total_worker_seconds =
                values.iter().sum::<f64>() * granularity_secs as f64;
            AnalysisSeries {
                logic_name,
                values,
                total_worker_seconds,
            }
        })
        .collect();

    // Rank by total worker-time, ties by case-insensitive logic name.
    series.sort_by(|a, b| {
        b.total_worker_seconds
            .partial_cmp(&a.total_worker_seconds)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.logic_name.to_lowercase().cmp(&b.logic_name.to_lowercase()))
    });

    ActivityProfile {
        bucket_starts,
        granularity_secs,
        series,
    }
}

/// Keep the top series per the selector and fold the rest into OTHER.
pub fn apply_top_selection(profile: &mut ActivityProfile, selector: TopSelector) {
    let keep = match selector {
        TopSelector::Count(count) => count.min(profile.series.len()),
        TopSelector::Fraction(fraction) => {
            let grand_total: f64 = profile.series.iter().map(|s| s.total_worker_seconds).sum();
            let target = 0.995 * fraction * grand_total;
            let mut cumulative = 0.0;
            let mut keep = profile.series.len();
            for (index, series) in profile.series.iter().enumerate() {
                cumulative += series.total_worker_seconds;
                if cumulative >= target {
                    keep = index + 1;
                    break;
                }
            }
            keep
        }
    };

    if keep >= profile.series.len() {
        return;
    }
    let folded: Vec<AnalysisSeries> = profile.series.split_off(keep);
    let mut other_values = vec![0.0; profile.bucket_starts.len()];
    let mut other_total = 0.0;
    for series in folded {
        for (bucket, value) in series.values.iter().enumerate() {
            other_values[bucket] += value;
        }
        other_total += series.total_worker_seconds;
    }
    profile.series.push(AnalysisSeries {
        logic_name: OTHER_SERIES.to_string(),
        values: other_values,
        total_worker_seconds: other_total,
    });
}

/// Bucket indices to emit after compressing long idle gaps.
///
/// Runs of all-idle buckets no longer than the threshold pass through
/// unchanged; longer runs keep a two-bucket head and a two-bucket tail.
pub fn kept_bucket_indices(profile: &ActivityProfile, skip_no_activity_minutes: u32) -> Vec<usize> {
    let bucket_count = profile.bucket_starts.len();
    let threshold_buckets = ((i64::from(skip_no_activity_minutes) * 60)
        / profile.granularity_secs.max(1))
    .max(1) as usize;

    let idle: Vec<bool> = (0..bucket_count)
        .map(|bucket| profile.bucket_total(bucket) == 0.0)
        .collect();

    let mut kept = Vec::with_capacity(bucket_count);
    let mut bucket = 0;
    while bucket < bucket_count {
        if !idle[bucket] {
            kept.push(bucket);
            bucket += 1;
            continue;
        }
        let run_start = bucket;
        while bucket < bucket_count && idle[bucket] {
            bucket += 1;
        }
        let run_len = bucket - run_start;
        if run_len <= threshold_buckets {
            kept.extend(run_start..bucket);
        } else {
            kept.extend(run_start..run_start + 2);
            kept.extend(bucket - 2..bucket);
        }
    }
    kept
}

/// Render the profile as a tab-separated table: one row per kept bucket,
/// one column per ranked series.
pub fn render_tsv(profile: &ActivityProfile, kept: &[usize]) -> String {
    let mut out = String::new();
    out.push_str("date");
    for series in &profile.series {
        out.push('\t');
        out.push_str(&series.logic_name);
    }
    out.push('\n');

    for &bucket in kept {
        let when = chrono::DateTime::from_timestamp(profile.bucket_starts[bucket], 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| profile.bucket_starts[bucket].to_string());
        out.push_str(&when);
        for series in &profile.series {
            out.push('\t');
            out.push_str(&format!("{:.2}", series.values[bucket]));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn interval(name: &str, born: i64, died: i64) -> WorkerInterval {
        WorkerInterval {
            analysis_id: 1,
            logic_name: name.to_string(),
            born,
            died: Some(died),
        }
    }

    #[test]
    fn reference_bucketing() {
        // Three workers: [00:00, 00:10], [00:05, 00:15], [00:05, 00:07],
        // five-minute buckets.
        let intervals = vec![
            interval("blast", 0, 600),
            interval("blast", 300, 900),
            interval("blast", 300, 420),
        ];
        let profile = build_profile(&intervals, 0, 900, 5);
        assert_eq!(profile.bucket_starts, vec![0, 300, 600]);
        let values = &profile.series[0].values;
        assert!((values[0] - 1.0).abs() < 1e-9);
        assert!((values[1] - 3.0).abs() < 1e-9);
        assert!((values[2] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn alive_workers_count_to_the_end() {
        let intervals = vec![WorkerInterval {
            analysis_id: 1,
            logic_name: "align".to_string(),
            born: 0,
            died: None,
        }];
        let profile = build_profile(&intervals, 0, 600, 5);
        assert!((profile.series[0].values[0] - 1.0).abs() < 1e-9);
        assert!((profile.series[0].values[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ranking_is_by_total_then_name() {
        let intervals = vec![
            interval("small", 0, 300),
            interval("Big", 0, 900),
            interval("also_small", 0, 300),
        ];
        let profile = build_profile(&intervals, 0, 900, 5);
        let names: Vec<&str> = profile.series.iter().map(|s| s.logic_name.as_str()).collect();
        assert_eq!(names, vec!["Big", "also_small", "small"]);
    }

    #[test]
    fn top_count_folds_the_tail_into_other() {
        let intervals = vec![
            interval("a", 0, 900),
            interval("b", 0, 600),
            interval("c", 0, 300),
        ];
        let mut profile = build_profile(&intervals, 0, 900, 5);
        apply_top_selection(&mut profile, TopSelector::Count(1));
        assert_eq!(profile.series.len(), 2);
        assert_eq!(profile.series[0].logic_name, "a");
        assert_eq!(profile.series[1].logic_name, OTHER_SERIES);
        assert!((profile.series[1].values[0] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn top_fraction_takes_smallest_sufficient_prefix() {
        let intervals = vec![
            interval("a", 0, 900),
            interval("b", 0, 600),
            interval("c", 0, 300),
        ];
        // Totals: a=900, b=600, c=300, grand=1800. A 0.5 fraction targets
        // 0.995*900 = 895.5, so "a" alone suffices.
        let mut profile = build_profile(&intervals, 0, 900, 5);
        apply_top_selection(&mut profile, TopSelector::Fraction(0.5));
        assert_eq!(profile.series[0].logic_name, "a");
        assert_eq!(profile.series[1].logic_name, OTHER_SERIES);
        assert_eq!(profile.series.len(), 2);
    }

    #[test]
    fn selector_parsing() {
        assert_eq!("10".parse::<TopSelector>(), Ok(TopSelector::Count(10)));
        assert_eq!("0.9".parse::<TopSelector>(), Ok(TopSelector::Fraction(0.9)));
        assert!("0".parse::<TopSelector>().is_err());
        assert!("1.5".parse::<TopSelector>().is_err());
        assert!("lots".parse::<TopSelector>().is_err());
    }

    #[test]
    fn long_idle_runs_are_compressed_to_head_and_tail() {
        // Activity in the first and last bucket, 10 idle buckets between,
        // threshold of 4 buckets (20 minutes at G=5).
        let intervals = vec![interval("a", 0, 300), interval("a", 3300, 3600)];
        let profile = build_profile(&intervals, 0, 3600, 5);
        let kept = kept_bucket_indices(&profile, 20);
        assert_eq!(kept, vec![0, 1, 2, 9, 10, 11]);

        // A short gap passes through untouched.
        let kept_all = kept_bucket_indices(&profile, 120);
        assert_eq!(kept_all.len(), profile.bucket_starts.len());
    }

    #[test]
    fn tsv_has_one_row_per_kept_bucket() {
        let intervals = vec![interval("a", 0, 600)];
        let profile = build_profile(&intervals, 0, 900, 5);
        let kept = kept_bucket_indices(&profile, 120);
        let tsv = render_tsv(&profile, &kept);
        let lines: Vec<&str> = tsv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "date\ta");
        assert!(lines[1].ends_with("\t1.00"));
        assert!(lines[3].ends_with("\t0.00"));
    }

    proptest! {
        /// Worker-seconds are conserved: the bucketed values of an analysis
        /// sum back to the clipped lifetimes of its workers.
        #[test]
        fn worker_seconds_are_conserved(
            born in 0i64..5000,
            lifetime in 1i64..5000,
            granularity in 1u32..30,
        ) {
            let died = born + lifetime;
            let end = 10_000i64;
            let intervals = vec![interval("a", born, died)];
            let profile = build_profile(&intervals, 0, end, granularity);

            let bucketed: f64 = profile.series[0]
                .values
                .iter()
                .sum::<f64>() * profile.granularity_secs as f64;
            // Clip the lifetime to the profiled range, which itself is
            // rounded up to whole buckets.
            let range_end = profile.bucket_starts.last().unwrap() + profile.granularity_secs;
            let expected = (died.min(range_end) - born.max(0)).max(0) as f64;
            prop_assert!((bucketed - expected).abs() < 1e-6);
        }
    }
}
