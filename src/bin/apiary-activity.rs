//! CLI for the activity profiler: reconstruct historical worker-per-analysis
//! concurrency from the hive database and emit it as a TSV table or a
//! stacked-area SVG chart.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use apiary::profiler::{
    apply_top_selection, build_profile, kept_bucket_indices, render::render_svg, render_tsv,
    TopSelector,
};
use apiary::{Database, HiveConfig};

#[derive(Parser, Debug)]
#[command(
    name = "apiary-activity",
    about = "Plot worker activity per analysis over a time range."
)]
struct Args {
    /// Database URL; falls back to HIVE_DATABASE_URL.
    #[arg(long)]
    url: Option<String>,

    /// Range start, "YYYY-MM-DD" or "YYYY-MM-DD HH:MM:SS"; defaults to the
    /// first worker birth.
    #[arg(long = "start_date")]
    start_date: Option<String>,

    /// Range end; defaults to the last worker death (or now).
    #[arg(long = "end_date")]
    end_date: Option<String>,

    /// Bucket width in minutes.
    #[arg(long, default_value_t = 5)]
    granularity: u32,

    /// Compress idle gaps longer than this many minutes.
    #[arg(long = "skip_no_activity", default_value_t = 120)]
    skip_no_activity: u32,

    /// Keep the top N analyses (integer) or the top fraction of total
    /// worker-time (0 < f < 1); the rest fold into OTHER.
    #[arg(long)]
    top: Option<String>,

    /// Output file; the extension selects the format. Omit for TSV on
    /// stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn parse_date(s: &str) -> Result<i64> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc().timestamp());
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| anyhow!("cannot parse date '{s}'; expected YYYY-MM-DD [HH:MM:SS]"))?;
    let dt = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("cannot parse date '{s}'"))?;
    Ok(dt.and_utc().timestamp())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let top = match &args.top {
        Some(raw) => Some(raw.parse::<TopSelector>().map_err(|err| anyhow!(err))?),
        None => None,
    };

    let url = match args.url {
        Some(url) => url,
        None => HiveConfig::from_env()?.database_url,
    };
    let db = Database::connect(&url)
        .await
        .context("cannot connect to the hive database")?;

    let (first_born, last_died) = db.fetch_worker_activity_bounds().await?;
    let start = match &args.start_date {
        Some(raw) => parse_date(raw)?,
        None => first_born.ok_or_else(|| anyhow!("no workers recorded and no --start_date"))?,
    };
    let end = match &args.end_date {
        Some(raw) => parse_date(raw)?,
        None => last_died.unwrap_or_else(|| chrono::Utc::now().timestamp()),
    };
    if end <= start {
        bail!("end date {end} is not after start date {start}");
    }

    let intervals = db.fetch_worker_activity(start, end).await?;
    let mut profile = build_profile(&intervals, start, end, args.granularity);
    if let Some(selector) = top {
        apply_top_selection(&mut profile, selector);
    }
    let kept = kept_bucket_indices(&profile, args.skip_no_activity);

    match &args.output {
        None => {
            print!("{}", render_tsv(&profile, &kept));
        }
        Some(path) => {
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase)
                .unwrap_or_default();
            match extension.as_str() {
                "svg" => {
                    // Honour a configured palette when the environment has
                    // one; otherwise fall back to the built-in colours.
                    let palette = HiveConfig::from_env()
                        .map(|config| config.palette)
                        .unwrap_or_else(|_| HiveConfig::new(&url).palette);
                    std::fs::write(path, render_svg(&profile, &kept, &palette))
                        .with_context(|| format!("cannot write {}", path.display()))?;
                }
                other => {
                    bail!("unsupported output format '{other}'; supported: svg (or omit --output for TSV)");
                }
            }
        }
    }

    Ok(())
}
