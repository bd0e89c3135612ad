use hdrhistogram::Histogram;
use std::time::Duration;

// 1us to 60s range, 3 significant digits
const HIST_LOW_US: u64 = 1;
const HIST_HIGH_US: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

/// Latency accumulator (milliseconds).
///
/// Exact min/max/mean/sample variance via Welford's streaming update, plus an
/// HDR histogram for percentiles. Two accumulators merge with the pooled
/// (Chan et al.) formula, so combining per-client results gives the same
/// answer as recording every sample into one accumulator.
#[derive(Clone, Debug)]
pub struct LatencyStats {
    count: u64,
    min: f64,
    max: f64,
    mean: f64,
    // Sum of squared deviations from the mean
    m2: f64,
    hist: Histogram<u64>,
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyStats {
    pub fn new() -> Self {
        Self {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            mean: 0.0,
            m2: 0.0,
            hist: Histogram::new_with_bounds(HIST_LOW_US, HIST_HIGH_US, HIST_SIGFIG)
                .expect("static histogram bounds are valid"),
        }
    }

    pub fn from_samples(samples: &[f64]) -> Self {
        let mut stats = Self::new();
        for &s in samples {
            stats.record(s);
        }
        stats
    }

    /// Record one latency sample in milliseconds.
    pub fn record(&mut self, ms: f64) {
        self.count += 1;
        let delta = ms - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (ms - self.mean);
        self.min = self.min.min(ms);
        self.max = self.max.max(ms);
        let us = (ms * 1000.0).round().max(HIST_LOW_US as f64) as u64;
        self.hist.saturating_record(us);
    }

    pub fn merge(&mut self, other: &LatencyStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let n = n_a + n_b;
        let delta = other.mean - self.mean;
        self.mean += delta * n_b / n;
        self.m2 += other.m2 + delta * delta * n_a * n_b / n;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        // Same bounds on both sides, so this cannot overflow the range
        let _ = self.hist.add(&other.hist);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    // Empty accumulators report 0.0 for every statistic.

    pub fn min(&self) -> f64 {
        if self.is_empty() { 0.0 } else { self.min }
    }

    pub fn max(&self) -> f64 {
        if self.is_empty() { 0.0 } else { self.max }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Sample variance (n - 1 denominator); 0.0 below two samples.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).max(0.0)
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Latency at quantile `q` in `[0, 1]`, at histogram resolution.
    pub fn percentile(&self, q: f64) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.hist.value_at_quantile(q) as f64 / 1000.0
    }
}

/// How a client's run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientOutcome {
    /// Every generated message went through the publisher
    Completed,
    /// The initial broker handshake failed; nothing was published
    ConnectFailed(String),
    /// The publisher stopped without signalling completion
    Aborted,
    /// No result before the fleet deadline
    TimedOut,
}

impl ClientOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ClientOutcome::Completed)
    }
}

/// Per-client summary, produced once when the client finishes.
#[derive(Clone, Debug)]
pub struct RunResult {
    pub id: u32,
    pub successes: u64,
    pub failures: u64,
    pub run_time: Duration,
    pub msgs_per_sec: f64,
    pub latency: LatencyStats,
    pub outcome: ClientOutcome,
}

impl RunResult {
    /// Build the result for a finished run. `elapsed` is clamped to 1ns so
    /// the rate is always defined.
    pub fn new(
        id: u32,
        successes: u64,
        failures: u64,
        elapsed: Duration,
        latency: LatencyStats,
        outcome: ClientOutcome,
    ) -> Self {
        let run_time = elapsed.max(Duration::from_nanos(1));
        Self {
            id,
            successes,
            failures,
            run_time,
            msgs_per_sec: successes as f64 / run_time.as_secs_f64(),
            latency,
            outcome,
        }
    }

    /// Result for a client that never reported: every message counts as failed.
    pub fn unfinished(id: u32, msg_count: u64, elapsed: Duration, outcome: ClientOutcome) -> Self {
        Self::new(id, 0, msg_count, elapsed, LatencyStats::new(), outcome)
    }

    pub fn msg_time_min(&self) -> f64 {
        self.latency.min()
    }

    pub fn msg_time_max(&self) -> f64 {
        self.latency.max()
    }

    pub fn msg_time_mean(&self) -> f64 {
        self.latency.mean()
    }

    pub fn msg_time_std(&self) -> f64 {
        self.latency.std_dev()
    }
}

/// Fleet-wide view combining every client's [`RunResult`].
#[derive(Clone, Debug)]
pub struct AggregateResult {
    pub clients: usize,
    pub successes: u64,
    pub failures: u64,
    /// successes / (successes + failures); 0.0 when nothing was attempted
    pub ratio: f64,
    /// Longest client run time
    pub total_run_time: Duration,
    pub avg_run_time: Duration,
    pub msg_time_min: f64,
    pub msg_time_max: f64,
    /// Pooled over every successful message of every client
    pub msg_time_mean: f64,
    pub msg_time_std: f64,
    /// Mean of client means (clients with at least one sample)
    pub msg_time_mean_avg: f64,
    /// Sample std of client means
    pub msg_time_mean_std: f64,
    pub msg_time_p50: f64,
    pub msg_time_p95: f64,
    pub msg_time_p99: f64,
    /// Sum of client rates
    pub total_msgs_per_sec: f64,
    pub avg_msgs_per_sec: f64,
    pub connect_failures: usize,
    pub timed_out: usize,
}

impl AggregateResult {
    /// Combine results in any order; counters are exact sums and latency is
    /// merged from the per-client accumulators.
    pub fn from_results(results: &[RunResult]) -> Self {
        let mut latency = LatencyStats::new();
        let mut successes = 0u64;
        let mut failures = 0u64;
        let mut total_run_time = Duration::ZERO;
        let mut sum_run_time = Duration::ZERO;
        let mut total_msgs_per_sec = 0.0;
        let mut connect_failures = 0usize;
        let mut timed_out = 0usize;
        let mut means = Vec::with_capacity(results.len());

        for r in results {
            successes += r.successes;
            failures += r.failures;
            total_run_time = total_run_time.max(r.run_time);
            sum_run_time += r.run_time;
            total_msgs_per_sec += r.msgs_per_sec;
            latency.merge(&r.latency);
            if !r.latency.is_empty() {
                means.push(r.latency.mean());
            }
            match r.outcome {
                ClientOutcome::ConnectFailed(_) => connect_failures += 1,
                ClientOutcome::TimedOut => timed_out += 1,
                _ => {}
            }
        }

        let clients = results.len();
        let attempted = successes + failures;
        let (avg_run_time, avg_msgs_per_sec) = if clients > 0 {
            (sum_run_time / clients as u32, total_msgs_per_sec / clients as f64)
        } else {
            (Duration::ZERO, 0.0)
        };
        let (msg_time_mean_avg, msg_time_mean_std) = mean_and_sample_std(&means);

        Self {
            clients,
            successes,
            failures,
            ratio: if attempted > 0 {
                successes as f64 / attempted as f64
            } else {
                0.0
            },
            total_run_time,
            avg_run_time,
            msg_time_min: latency.min(),
            msg_time_max: latency.max(),
            msg_time_mean: latency.mean(),
            msg_time_std: latency.std_dev(),
            msg_time_mean_avg,
            msg_time_mean_std,
            msg_time_p50: latency.percentile(0.50),
            msg_time_p95: latency.percentile(0.95),
            msg_time_p99: latency.percentile(0.99),
            total_msgs_per_sec,
            avg_msgs_per_sec,
            connect_failures,
            timed_out,
        }
    }
}

fn mean_and_sample_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}
