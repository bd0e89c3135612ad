//! Text and CSV rendering of run results.

use std::fmt::Write;

use crate::metrics::stats::{AggregateResult, ClientOutcome, RunResult};
use crate::roles::aggregator::FleetReport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Text,
    Csv,
}

impl Format {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Some(Format::Text),
            "csv" => Some(Format::Csv),
            _ => None,
        }
    }
}

pub fn render(report: &FleetReport, format: Format) -> String {
    match format {
        Format::Text => render_text(report),
        Format::Csv => render_csv(report),
    }
}

fn outcome_label(outcome: &ClientOutcome) -> &'static str {
    match outcome {
        ClientOutcome::Completed => "completed",
        ClientOutcome::ConnectFailed(_) => "connect_failed",
        ClientOutcome::Aborted => "aborted",
        ClientOutcome::TimedOut => "timed_out",
    }
}

fn ratio(successes: u64, failures: u64) -> f64 {
    let total = successes + failures;
    if total == 0 {
        0.0
    } else {
        successes as f64 / total as f64
    }
}

pub fn render_text(report: &FleetReport) -> String {
    let mut out = String::new();
    for r in &report.results {
        write_client(&mut out, r);
    }
    write_total(&mut out, &report.aggregate);
    out
}

fn write_client(out: &mut String, r: &RunResult) {
    let _ = writeln!(out, "======= CLIENT {} =======", r.id);
    if let ClientOutcome::ConnectFailed(reason) = &r.outcome {
        let _ = writeln!(out, "Connect failed:      {}", reason);
    } else if !r.outcome.is_completed() {
        let _ = writeln!(out, "Outcome:             {}", outcome_label(&r.outcome));
    }
    let _ = writeln!(
        out,
        "Ratio:               {:.3} ({}/{})",
        ratio(r.successes, r.failures),
        r.successes,
        r.successes + r.failures
    );
    let _ = writeln!(out, "Runtime (s):         {:.3}", r.run_time.as_secs_f64());
    let _ = writeln!(out, "Msg time min (ms):   {:.3}", r.msg_time_min());
    let _ = writeln!(out, "Msg time max (ms):   {:.3}", r.msg_time_max());
    let _ = writeln!(out, "Msg time mean (ms):  {:.3}", r.msg_time_mean());
    let _ = writeln!(out, "Msg time std (ms):   {:.3}", r.msg_time_std());
    let _ = writeln!(
        out,
        "Msg time p50/p95/p99 (ms): {:.3} / {:.3} / {:.3}",
        r.latency.percentile(0.50),
        r.latency.percentile(0.95),
        r.latency.percentile(0.99)
    );
    let _ = writeln!(out, "Bandwidth (msg/sec): {:.3}", r.msgs_per_sec);
    out.push('\n');
}

fn write_total(out: &mut String, a: &AggregateResult) {
    let _ = writeln!(out, "========= TOTAL ({}) =========", a.clients);
    let _ = writeln!(
        out,
        "Total Ratio:                 {:.3} ({}/{})",
        a.ratio,
        a.successes,
        a.successes + a.failures
    );
    if a.connect_failures > 0 || a.timed_out > 0 {
        let _ = writeln!(
            out,
            "Failed clients:              {} connect, {} timed out",
            a.connect_failures, a.timed_out
        );
    }
    let _ = writeln!(out, "Total Runtime (sec):         {:.3}", a.total_run_time.as_secs_f64());
    let _ = writeln!(out, "Average Runtime (sec):       {:.3}", a.avg_run_time.as_secs_f64());
    let _ = writeln!(out, "Msg time min (ms):           {:.3}", a.msg_time_min);
    let _ = writeln!(out, "Msg time max (ms):           {:.3}", a.msg_time_max);
    let _ = writeln!(out, "Msg time mean (ms):          {:.3}", a.msg_time_mean);
    let _ = writeln!(out, "Msg time std (ms):           {:.3}", a.msg_time_std);
    let _ = writeln!(out, "Msg time mean mean (ms):     {:.3}", a.msg_time_mean_avg);
    let _ = writeln!(out, "Msg time mean std (ms):      {:.3}", a.msg_time_mean_std);
    let _ = writeln!(
        out,
        "Msg time p50/p95/p99 (ms):   {:.3} / {:.3} / {:.3}",
        a.msg_time_p50, a.msg_time_p95, a.msg_time_p99
    );
    let _ = writeln!(out, "Average Bandwidth (msg/sec): {:.3}", a.avg_msgs_per_sec);
    let _ = writeln!(out, "Total Bandwidth (msg/sec):   {:.3}", a.total_msgs_per_sec);
}

/// CSV header
pub fn csv_header() -> &'static str {
    concat!(
        "client,outcome,successes,failures,run_time_s,msgs_per_sec,",
        "msg_time_min_ms,msg_time_max_ms,msg_time_mean_ms,msg_time_std_ms,",
        "msg_time_p50_ms,msg_time_p95_ms,msg_time_p99_ms"
    )
}

pub fn csv_row(r: &RunResult) -> String {
    format!(
        "{},{},{},{},{:.6},{:.2},{:.3},{:.3},{:.3},{:.3},{:.3},{:.3},{:.3}",
        r.id,
        outcome_label(&r.outcome),
        r.successes,
        r.failures,
        r.run_time.as_secs_f64(),
        r.msgs_per_sec,
        r.msg_time_min(),
        r.msg_time_max(),
        r.msg_time_mean(),
        r.msg_time_std(),
        r.latency.percentile(0.50),
        r.latency.percentile(0.95),
        r.latency.percentile(0.99),
    )
}

/// Fleet totals in the client column layout: longest run time, summed rate, pooled latency.
pub fn csv_total_row(a: &AggregateResult) -> String {
    format!(
        "total,{},{},{},{:.6},{:.2},{:.3},{:.3},{:.3},{:.3},{:.3},{:.3},{:.3}",
        if a.connect_failures + a.timed_out == 0 { "completed" } else { "partial" },
        a.successes,
        a.failures,
        a.total_run_time.as_secs_f64(),
        a.total_msgs_per_sec,
        a.msg_time_min,
        a.msg_time_max,
        a.msg_time_mean,
        a.msg_time_std,
        a.msg_time_p50,
        a.msg_time_p95,
        a.msg_time_p99,
    )
}

pub fn render_csv(report: &FleetReport) -> String {
    let mut out = String::new();
    out.push_str(csv_header());
    out.push('\n');
    for r in &report.results {
        out.push_str(&csv_row(r));
        out.push('\n');
    }
    out.push_str(&csv_total_row(&report.aggregate));
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::stats::LatencyStats;
    use std::time::Duration;

    fn report() -> FleetReport {
        let results = vec![
            RunResult::new(
                0,
                3,
                1,
                Duration::from_secs(2),
                LatencyStats::from_samples(&[1.0, 2.0, 3.0]),
                ClientOutcome::Completed,
            ),
            RunResult::unfinished(
                1,
                4,
                Duration::from_millis(5),
                ClientOutcome::ConnectFailed("refused".into()),
            ),
        ];
        let aggregate = AggregateResult::from_results(&results);
        FleetReport { results, aggregate }
    }

    #[test]
    fn csv_rows_match_header_width() {
        let out = render_csv(&report());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        let cols = csv_header().split(',').count();
        for line in &lines[1..] {
            assert_eq!(line.split(',').count(), cols, "row {}", line);
        }
        assert!(lines[1].starts_with("0,completed,3,1,"));
        assert!(lines[2].starts_with("1,connect_failed,0,4,"));
        assert!(lines[3].starts_with("total,partial,3,5,"));
    }

    #[test]
    fn text_has_client_blocks_and_totals() {
        let out = render_text(&report());
        assert!(out.contains("======= CLIENT 0 ======="));
        assert!(out.contains("======= CLIENT 1 ======="));
        assert!(out.contains("Connect failed:      refused"));
        assert!(out.contains("Ratio:               0.750 (3/4)"));
        assert!(out.contains("========= TOTAL (2) ========="));
        assert!(out.contains("Total Ratio:                 0.375 (3/8)"));
        assert!(out.contains("1 connect, 0 timed out"));
    }

    #[test]
    fn format_names() {
        assert_eq!(Format::parse("TEXT"), Some(Format::Text));
        assert_eq!(Format::parse("csv"), Some(Format::Csv));
        assert_eq!(Format::parse("json"), None);
    }
}
