//! One simulated client: generator + publisher + the collection loop that
//! turns published messages into a [`RunResult`].

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::config::ClientConfig;
use crate::metrics::stats::{ClientOutcome, LatencyStats, RunResult};
use crate::roles::generator::Generator;
use crate::roles::publisher::{Publisher, PublisherEvent};
use crate::transport::Connector;

const EVENT_BUFFER: usize = 8;

pub struct Client {
    cfg: ClientConfig,
    connector: Arc<dyn Connector>,
}

impl Client {
    pub fn new(cfg: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self { cfg, connector }
    }

    /// Run the whole pipeline to completion and summarise it.
    ///
    /// `successes + failures` always equals the configured message count:
    /// anything the publisher never reported on is counted as failed.
    pub async fn run(self) -> RunResult {
        let cfg = self.cfg;
        let started = Instant::now();

        let (msg_tx, msg_rx) = flume::bounded(0);
        let (event_tx, mut event_rx) = mpsc::channel(EVENT_BUFFER);
        // Dropping the set (client aborted from outside) aborts both stages
        let mut stages = JoinSet::new();
        let generator = Generator::from_config(&cfg);
        stages.spawn(async move {
            generator.run(msg_tx).await;
        });
        stages.spawn(Publisher::new(&cfg, self.connector).run(msg_rx, event_tx));

        let mut successes = 0u64;
        let mut failures = 0u64;
        let mut latency = LatencyStats::new();

        let outcome = loop {
            match event_rx.recv().await {
                Some(PublisherEvent::Published(m)) => {
                    if m.is_error() {
                        warn!(client = cfg.id, topic = %m.topic, "Error publishing message");
                        failures += 1;
                    } else {
                        successes += 1;
                        if let Some(ms) = m.latency_ms() {
                            latency.record(ms);
                        }
                    }
                }
                Some(PublisherEvent::ConnectFailed(reason)) => {
                    break ClientOutcome::ConnectFailed(reason)
                }
                Some(PublisherEvent::Finished { .. }) => break ClientOutcome::Completed,
                None => {
                    error!(client = cfg.id, "Publisher stopped without signalling completion");
                    break ClientOutcome::Aborted;
                }
            }
        };
        let elapsed = started.elapsed();
        drop(event_rx);

        let unaccounted = cfg.msg_count.saturating_sub(successes + failures);
        if unaccounted > 0 {
            debug!(client = cfg.id, unaccounted, "Counting unpublished messages as failures");
            failures += unaccounted;
        }

        while let Some(joined) = stages.join_next().await {
            if let Err(e) = joined {
                warn!(client = cfg.id, error = %e, "Pipeline stage failed");
            }
        }

        let result = RunResult::new(cfg.id, successes, failures, elapsed, latency, outcome);
        debug!(
            client = cfg.id,
            successes = result.successes,
            failures = result.failures,
            msgs_per_sec = format!("{:.2}", result.msgs_per_sec),
            "Client finished"
        );
        result
    }
}

/// Run one client and deliver its result exactly once.
pub async fn run_client(
    cfg: ClientConfig,
    connector: Arc<dyn Connector>,
    results: mpsc::Sender<RunResult>,
) {
    let id = cfg.id;
    let result = Client::new(cfg, connector).run().await;
    if results.send(result).await.is_err() {
        debug!(client = id, "Result receiver gone");
    }
}
