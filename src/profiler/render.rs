//! Stacked-area SVG rendering of an activity profile.
//!
//! The chart is emitted as plain SVG markup: buckets left to right (idle
//! gaps already compressed away by the caller), series stacked bottom-up in
//! rank order, a legend on the right, and a NOTHING marker row along the
//! baseline wherever every analysis was idle.

use super::ActivityProfile;

const WIDTH: f64 = 1200.0;
const HEIGHT: f64 = 600.0;
const MARGIN_LEFT: f64 = 60.0;
const MARGIN_RIGHT: f64 = 220.0;
const MARGIN_TOP: f64 = 20.0;
const MARGIN_BOTTOM: f64 = 40.0;

fn format_bucket_time(epoch: i64) -> String {
    chrono::DateTime::from_timestamp(epoch, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| epoch.to_string())
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Render the kept buckets of a profile as a stacked-area chart.
pub fn render_svg(profile: &ActivityProfile, kept: &[usize], palette: &[String]) -> String {
    let plot_width = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let baseline = MARGIN_TOP + plot_height;

    let max_total = kept
        .iter()
        .map(|&bucket| profile.bucket_total(bucket))
        .fold(1.0_f64, f64::max);
    let x_step = if kept.len() > 1 {
        plot_width / (kept.len() - 1) as f64
    } else {
        plot_width
    };
    let x_at = |position: usize| MARGIN_LEFT + position as f64 * x_step;
    let y_at = |value: f64| baseline - (value / max_total) * plot_height;

    let mut svg = String::new();
    svg.push_str(&format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{WIDTH}\" height=\"{HEIGHT}\" \
         viewBox=\"0 0 {WIDTH} {HEIGHT}\">\n"
    ));
    svg.push_str(&format!(
        "  <rect width=\"{WIDTH}\" height=\"{HEIGHT}\" fill=\"white\"/>\n"
    ));

    // Stack the series bottom-up in rank order: the cumulative totals after
    // each series form the upper edge of its area.
    let mut lower: Vec<f64> = vec![0.0; kept.len()];
    for (index, series) in profile.series.iter().enumerate() {
        let color = &palette[index % palette.len()];
        let upper: Vec<f64> = kept
            .iter()
            .enumerate()
            .map(|(position, &bucket)| lower[position] + series.values[bucket])
            .collect();

        let mut points = String::new();
        for (position, value) in upper.iter().enumerate() {
            points.push_str(&format!("{:.1},{:.1} ", x_at(position), y_at(*value)));
        }
        for (position, value) in lower.iter().enumerate().rev() {
            points.push_str(&format!("{:.1},{:.1} ", x_at(position), y_at(*value)));
        }
        svg.push_str(&format!(
            "  <polygon points=\"{}\" fill=\"{}\" stroke=\"none\" fill-opacity=\"0.85\"/>\n",
            points.trim_end(),
            color
        ));
        lower = upper;
    }

    // NOTHING markers: grey ticks on the baseline where all analyses idle.
    for (position, &bucket) in kept.iter().enumerate() {
        if profile.bucket_total(bucket) == 0.0 {
            svg.push_str(&format!(
                "  <rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"4\" fill=\"#999999\"/>\n",
                x_at(position) - x_step / 2.0,
                baseline - 4.0,
                x_step.max(1.0)
            ));
        }
    }

    // Axes and labels.
    svg.push_str(&format!(
        "  <line x1=\"{MARGIN_LEFT}\" y1=\"{baseline}\" x2=\"{:.1}\" y2=\"{baseline}\" \
         stroke=\"black\"/>\n",
        MARGIN_LEFT + plot_width
    ));
    svg.push_str(&format!(
        "  <line x1=\"{MARGIN_LEFT}\" y1=\"{MARGIN_TOP}\" x2=\"{MARGIN_LEFT}\" y2=\"{baseline}\" \
         stroke=\"black\"/>\n"
    ));
    svg.push_str(&format!(
        "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"12\" text-anchor=\"end\">{:.0}</text>\n",
        MARGIN_LEFT - 6.0,
        MARGIN_TOP + 10.0,
        max_total
    ));
    svg.push_str(&format!(
        "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"12\" text-anchor=\"end\">0</text>\n",
        MARGIN_LEFT - 6.0,
        baseline
    ));
    if let (Some(&first), Some(&last)) = (kept.first(), kept.last()) {
        svg.push_str(&format!(
            "  <text x=\"{MARGIN_LEFT}\" y=\"{:.1}\" font-size=\"12\">{}</text>\n",
            baseline + 16.0,
            format_bucket_time(profile.bucket_starts[first])
        ));
        svg.push_str(&format!(
            "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"12\" text-anchor=\"end\">{}</text>\n",
            MARGIN_LEFT + plot_width,
            baseline + 16.0,
            format_bucket_time(profile.bucket_starts[last])
        ));
    }

    // Legend, in stack order.
    let legend_x = WIDTH - MARGIN_RIGHT + 20.0;
    for (index, series) in profile.series.iter().enumerate() {
        let color = &palette[index % palette.len()];
        let y = MARGIN_TOP + 10.0 + index as f64 * 18.0;
        svg.push_str(&format!(
            "  <rect x=\"{legend_x}\" y=\"{:.1}\" width=\"12\" height=\"12\" fill=\"{color}\"/>\n",
            y - 10.0
        ));
        svg.push_str(&format!(
            "  <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"12\">{}</text>\n",
            legend_x + 18.0,
            y,
            xml_escape(&series.logic_name)
        ));
    }

    svg.push_str("</svg>\n");
    svg
}
