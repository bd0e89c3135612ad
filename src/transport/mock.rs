//! Mock broker for tests: in-process acknowledgements with scripted delays and failures.

use super::{ConnectOptions, Connection, ConnectionHandlers, Connector, QoS, TransportError};
use bytes::Bytes;
use std::{
    collections::{BTreeMap, HashMap},
    ops::RangeInclusive,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

#[derive(Clone, Default)]
struct Ledger(Arc<Mutex<HashMap<String, u64>>>);

impl Ledger {
    fn record(&self, client_id: &str) {
        let mut map = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *map.entry(client_id.to_string()).or_default() += 1;
    }

    fn snapshot(&self) -> HashMap<String, u64> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Scripted broker. Publish indices are 1-based and counted per connection.
#[derive(Clone, Default)]
pub struct MockConnector {
    ack_delay: Duration,
    jitter: Duration,
    failures: Option<RangeInclusive<u64>>,
    connect_error: Option<String>,
    lose_connection_at: Option<u64>,
    ledger: Ledger,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed delay before every acknowledgement.
    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = delay;
        self
    }

    /// Extra random delay in `[0, max)` added per publish, seeded per client id.
    pub fn with_jitter(mut self, max: Duration) -> Self {
        self.jitter = max;
        self
    }

    pub fn with_failures(mut self, range: RangeInclusive<u64>) -> Self {
        self.failures = Some(range);
        self
    }

    pub fn with_connect_error(mut self, reason: impl Into<String>) -> Self {
        self.connect_error = Some(reason.into());
        self
    }

    /// Drop the connection right before the n-th publish; that publish fails
    /// and the connection comes back on its own.
    pub fn with_connection_loss_at(mut self, index: u64) -> Self {
        self.lose_connection_at = Some(index);
        self
    }

    /// Acknowledged publishes per broker client id.
    pub fn deliveries(&self) -> HashMap<String, u64> {
        self.ledger.snapshot()
    }

    /// Build from `KEY=VALUE` params: `ack_delay_ms`, `jitter_ms`, `fail_from`,
    /// `fail_to`, `connect_error`, `lose_at`.
    pub fn from_params(params: &BTreeMap<String, String>) -> Result<Self, TransportError> {
        fn num(
            params: &BTreeMap<String, String>,
            key: &str,
        ) -> Result<Option<u64>, TransportError> {
            params
                .get(key)
                .map(|v| {
                    v.parse::<u64>().map_err(|_| {
                        TransportError::Other(format!("mock param {}='{}' is not a number", key, v))
                    })
                })
                .transpose()
        }

        let mut connector = MockConnector::new();
        if let Some(ms) = num(params, "ack_delay_ms")? {
            connector = connector.with_ack_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = num(params, "jitter_ms")? {
            connector = connector.with_jitter(Duration::from_millis(ms));
        }
        if let Some(from) = num(params, "fail_from")? {
            let to = num(params, "fail_to")?.unwrap_or(u64::MAX);
            connector = connector.with_failures(from..=to);
        }
        if let Some(reason) = params.get("connect_error") {
            connector = connector.with_connect_error(reason.clone());
        }
        if let Some(at) = num(params, "lose_at")? {
            connector = connector.with_connection_loss_at(at);
        }
        Ok(connector)
    }
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _opts: &ConnectOptions,
        client_id: &str,
        handlers: ConnectionHandlers,
    ) -> Result<Box<dyn Connection>, TransportError> {
        if let Some(reason) = &self.connect_error {
            return Err(TransportError::Connect(reason.clone()));
        }
        handlers.connected();
        let seed = client_id
            .bytes()
            .fold(0x9E37_79B9_7F4A_7C15u64, |acc, b| (acc ^ b as u64).wrapping_mul(0x100_0000_01B3))
            | 1;
        Ok(Box::new(MockConnection {
            script: self.clone(),
            client_id: client_id.to_string(),
            handlers,
            published: AtomicU64::new(0),
            rng_state: AtomicU64::new(seed),
        }))
    }
}

struct MockConnection {
    script: MockConnector,
    client_id: String,
    handlers: ConnectionHandlers,
    published: AtomicU64,
    rng_state: AtomicU64,
}

impl MockConnection {
    // xorshift64, good enough for spreading delays
    fn next_jitter(&self) -> Duration {
        if self.script.jitter.is_zero() {
            return Duration::ZERO;
        }
        let mut x = self.rng_state.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state.store(x, Ordering::Relaxed);
        let frac = (x as f64) / (u64::MAX as f64);
        self.script.jitter.mul_f64(frac)
    }
}

#[async_trait::async_trait]
impl Connection for MockConnection {
    async fn publish(
        &self,
        _topic: &str,
        _qos: QoS,
        _payload: Bytes,
    ) -> Result<(), TransportError> {
        let index = self.published.fetch_add(1, Ordering::Relaxed) + 1;

        if self.script.lose_connection_at == Some(index) {
            self.handlers.connection_lost("simulated connection loss");
            self.handlers.connected();
            return Err(TransportError::Disconnected);
        }

        let delay = self.script.ack_delay + self.next_jitter();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(range) = &self.script.failures {
            if range.contains(&index) {
                return Err(TransportError::Publish(format!("broker rejected message {}", index)));
            }
        }
        self.script.ledger.record(&self.client_id);
        Ok(())
    }
}
