//! End-to-end runs of the publish pipeline against the mock broker.

#![cfg(feature = "transport-mock")]

use mq_pubbench::config::{BenchConfig, ClientConfig};
use mq_pubbench::metrics::stats::ClientOutcome;
use mq_pubbench::roles::aggregator::run_fleet;
use mq_pubbench::roles::client::Client;
use mq_pubbench::transport::mock::MockConnector;
use mq_pubbench::transport::{
    ConnectOptions, Connection, ConnectionHandlers, Connector, Engine, TransportBuilder,
    TransportError,
};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn bench(clients: u32, count: u64) -> BenchConfig {
    BenchConfig {
        engine: Engine::Mock,
        clients,
        msg_count: count,
        payload_size: 128,
        quiet: true,
        ..BenchConfig::default()
    }
}

fn single(count: u64) -> ClientConfig {
    bench(1, count).client_configs().remove(0)
}

// ============================================================================
// Per-client properties
// ============================================================================

#[tokio::test]
async fn successes_plus_failures_equals_count() {
    for n in [0u64, 1, 7, 100, 250] {
        let connector = Arc::new(MockConnector::new().with_failures(5..=9));
        let r = Client::new(single(n), connector).run().await;
        assert_eq!(r.successes + r.failures, n, "n = {}", n);
        let expected_failures = n.min(9).saturating_sub(4);
        assert_eq!(r.failures, expected_failures, "n = {}", n);
        assert_eq!(r.latency.count(), r.successes);
    }
}

#[tokio::test]
async fn rate_is_successes_over_duration() {
    let connector = Arc::new(MockConnector::new().with_ack_delay(Duration::from_millis(1)));
    let r = Client::new(single(20), connector).run().await;
    assert!(r.run_time > Duration::ZERO);
    let expected = r.successes as f64 / r.run_time.as_secs_f64();
    assert!((r.msgs_per_sec - expected).abs() < 1e-9 * expected.max(1.0));
}

#[tokio::test]
async fn latency_reflects_broker_delay() {
    let connector = Arc::new(MockConnector::new().with_ack_delay(Duration::from_millis(5)));
    let r = Client::new(single(10), connector).run().await;
    assert_eq!(r.successes, 10);
    assert_eq!(r.failures, 0);
    assert!(r.msg_time_min() >= 5.0, "min {}", r.msg_time_min());
    assert!(r.msg_time_min() <= r.msg_time_mean() && r.msg_time_mean() <= r.msg_time_max());
    assert!(r.msg_time_max() < 25.0, "max {}", r.msg_time_max());
    assert!(r.msg_time_mean() < 12.0, "mean {}", r.msg_time_mean());
    assert!(r.msg_time_std() < 4.0, "std {}", r.msg_time_std());
}

/// In-memory log sink shared with the fmt subscriber.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogBuffer {
    fn lines_containing(&self, needle: &str) -> Vec<String> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|l| l.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

/// Run one client under a capturing subscriber. The test runtime is
/// single threaded, so the scoped subscriber sees the spawned stages too.
async fn run_logged(quiet: bool, count: u64) -> (LogBuffer, u64) {
    let logs = LogBuffer::default();
    let sink = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || sink.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let mut cfg = single(count);
    cfg.quiet = quiet;
    let r = Client::new(cfg, Arc::new(MockConnector::new())).run().await;
    assert_eq!(r.outcome, ClientOutcome::Completed);
    (logs, r.successes)
}

#[tokio::test]
async fn progress_is_logged_every_hundred_messages() {
    let (logs, successes) = run_logged(false, 250).await;
    assert_eq!(successes, 250);
    let progress = logs.lines_containing("keeps publishing");
    assert_eq!(progress.len(), 2, "{:?}", progress);
    assert!(progress[0].contains("published=100"), "{}", progress[0]);
    assert!(progress[1].contains("published=200"), "{}", progress[1]);
}

#[tokio::test]
async fn quiet_clients_log_no_progress() {
    let (logs, successes) = run_logged(true, 250).await;
    assert_eq!(successes, 250);
    assert!(logs.lines_containing("keeps publishing").is_empty());
}

// ============================================================================
// Fleet aggregation
// ============================================================================

#[tokio::test]
async fn fleet_totals_are_exact_sums() {
    let connector = Arc::new(MockConnector::new().with_failures(10..=19));
    let report = run_fleet(bench(4, 50).client_configs(), connector, None)
        .await
        .expect("fleet");
    let succ: u64 = report.results.iter().map(|r| r.successes).sum();
    let fail: u64 = report.results.iter().map(|r| r.failures).sum();
    assert_eq!(report.aggregate.successes, succ);
    assert_eq!(report.aggregate.failures, fail);
    assert_eq!(succ, 4 * 40);
    assert_eq!(fail, 4 * 10);
}

#[tokio::test]
async fn concurrent_clients_stay_isolated() {
    // Independent jittered latencies per client, repeated to shake out interleavings
    for round in 0..5u64 {
        let connector = Arc::new(
            MockConnector::new()
                .with_ack_delay(Duration::from_micros(200))
                .with_jitter(Duration::from_millis(2)),
        );
        let report = run_fleet(bench(6, 40).client_configs(), connector.clone(), None)
            .await
            .expect("fleet");
        assert_eq!(report.results.len(), 6, "round {}", round);
        for r in &report.results {
            assert_eq!(r.successes, 40, "round {} client {}", round, r.id);
            assert_eq!(r.failures, 0);
            assert_eq!(r.latency.count(), 40);
        }
        let deliveries = connector.deliveries();
        assert_eq!(deliveries.len(), 6, "one broker connection per client");
        assert!(deliveries.values().all(|&n| n == 40));
        assert_eq!(report.aggregate.successes, 240);
    }
}

/// Refuses the handshake for a single client id, delegates the rest.
struct RefuseOne {
    inner: MockConnector,
    refused: u32,
}

#[async_trait::async_trait]
impl Connector for RefuseOne {
    async fn connect(
        &self,
        opts: &ConnectOptions,
        client_id: &str,
        handlers: ConnectionHandlers,
    ) -> Result<Box<dyn Connection>, TransportError> {
        if client_id.starts_with(&format!("mq-pubbench-{}-", self.refused)) {
            return Err(TransportError::Connect("not authorized".into()));
        }
        self.inner.connect(opts, client_id, handlers).await
    }
}

#[tokio::test]
async fn one_failed_connect_does_not_stop_the_fleet() {
    let connector = Arc::new(RefuseOne {
        inner: MockConnector::new().with_ack_delay(Duration::from_millis(1)),
        refused: 1,
    });
    let report = run_fleet(bench(3, 30).client_configs(), connector, None)
        .await
        .expect("fleet");
    assert_eq!(report.aggregate.connect_failures, 1);
    assert_eq!(report.aggregate.successes, 60);
    assert_eq!(report.aggregate.failures, 30);
    let refused = &report.results[1];
    assert!(matches!(refused.outcome, ClientOutcome::ConnectFailed(_)));
    assert_eq!(refused.failures, 30);
}

#[tokio::test]
async fn builder_wires_mock_params() {
    let mut opts = ConnectOptions::default();
    opts.params.insert("fail_from".into(), "3".into());
    opts.params.insert("fail_to".into(), "5".into());
    let connector = TransportBuilder::connector(Engine::Mock, &opts).expect("connector");
    let mut cfg = single(5);
    cfg.connect = opts;
    let r = Client::new(cfg, connector).run().await;
    assert_eq!(r.successes, 2);
    assert_eq!(r.failures, 3);
}
