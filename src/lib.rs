//! mq-pubbench library crate: publish/acknowledge load generation and latency statistics.

pub mod config;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod payload;
pub mod report;
pub mod roles;
pub mod transport;

pub use config::{BenchConfig, ClientConfig};
pub use metrics::stats::{AggregateResult, ClientOutcome, LatencyStats, RunResult};
pub use roles::aggregator::{run_fleet, FleetReport};
pub use transport::{ConnectOptions, Connector, Engine, QoS, TransportBuilder, TransportError};
