//! Fleet runner: one client task per config, fan-in of their results.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::metrics::stats::{AggregateResult, ClientOutcome, RunResult};
use crate::roles::client::run_client;
use crate::transport::Connector;

/// Everything a finished run produced: per-client results (sorted by id) and
/// their combination.
#[derive(Clone, Debug)]
pub struct FleetReport {
    pub results: Vec<RunResult>,
    pub aggregate: AggregateResult,
}

/// Run every client concurrently and wait for all of their results.
///
/// With a `deadline`, clients that have not reported by then are aborted
/// and reported as [`ClientOutcome::TimedOut`] with every message failed.
/// A client task that dies without reporting is [`ClientOutcome::Aborted`].
pub async fn run_fleet(
    configs: Vec<ClientConfig>,
    connector: Arc<dyn Connector>,
    deadline: Option<Duration>,
) -> Result<FleetReport> {
    let mut seen = HashSet::with_capacity(configs.len());
    for cfg in &configs {
        if !seen.insert(cfg.id) {
            bail!("duplicate client id {}", cfg.id);
        }
    }

    let started = Instant::now();
    let expected = configs.len();
    info!(clients = expected, deadline = ?deadline, "Starting fleet");

    // Capacity covers every client so a late reporter never blocks
    let (tx, mut rx) = mpsc::channel::<RunResult>(expected.max(1));
    let mut pending: HashMap<u32, u64> = configs.iter().map(|c| (c.id, c.msg_count)).collect();
    let mut handles = Vec::with_capacity(expected);
    for cfg in configs {
        handles.push(tokio::spawn(run_client(cfg, connector.clone(), tx.clone())));
    }
    drop(tx);

    let mut results = Vec::with_capacity(expected);
    let collect = async {
        while results.len() < expected {
            match rx.recv().await {
                Some(r) => {
                    pending.remove(&r.id);
                    results.push(r);
                }
                // every sender is gone; whatever is missing died silently
                None => break,
            }
        }
    };
    let timed_out = match deadline {
        Some(d) => tokio::time::timeout(d, collect).await.is_err(),
        None => {
            collect.await;
            false
        }
    };

    if !pending.is_empty() {
        let outcome = if timed_out {
            ClientOutcome::TimedOut
        } else {
            ClientOutcome::Aborted
        };
        warn!(missing = pending.len(), outcome = ?outcome, "Some clients did not report");
        let elapsed = started.elapsed();
        for (id, msg_count) in pending.drain() {
            results.push(RunResult::unfinished(id, msg_count, elapsed, outcome.clone()));
        }
    }

    for h in &handles {
        h.abort();
    }
    let _ = join_all(handles).await;

    results.sort_by_key(|r| r.id);
    let aggregate = AggregateResult::from_results(&results);
    info!(
        clients = aggregate.clients,
        successes = aggregate.successes,
        failures = aggregate.failures,
        total_rate = format!("{:.2}", aggregate.total_msgs_per_sec),
        duration = format!("{:.2}s", started.elapsed().as_secs_f64()),
        "Fleet finished"
    );
    Ok(FleetReport { results, aggregate })
}
