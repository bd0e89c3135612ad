use anyhow::{anyhow, Result};
use clap::Parser;
use mq_pubbench::config::BenchConfig;
use mq_pubbench::report::{render, Format};
use mq_pubbench::roles::aggregator::run_fleet;
use mq_pubbench::transport::config::{parse_connect_kv, parse_engine, parse_qos};
use mq_pubbench::transport::{ConnectOptions, TransportBuilder};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mq-pubbench")]
#[command(about = "Publish latency and throughput load generator for message brokers")]
struct Cli {
    /// Broker URL
    #[arg(long, default_value = "tcp://localhost:1883")]
    broker: String,

    /// Broker username (used only together with --password)
    #[arg(long, default_value = "")]
    username: String,

    /// Broker password
    #[arg(long, default_value = "")]
    password: String,

    /// Topic to publish to
    #[arg(long, default_value = "/test")]
    topic: String,

    /// QoS level (0,1,2)
    #[arg(long, default_value_t = 1u8)]
    qos: u8,

    /// Payload size in bytes
    #[arg(long, default_value = "100")]
    size: usize,

    /// Messages per client
    #[arg(long, default_value = "100")]
    count: u64,

    /// Number of concurrent clients
    #[arg(long, default_value = "10")]
    clients: u32,

    /// Suppress connection and progress notices
    #[arg(long, default_value = "false")]
    quiet: bool,

    /// Report format (text|csv)
    #[arg(long, default_value = "text")]
    format: String,

    /// Messaging engine (mqtt|mock)
    #[arg(long, default_value = "mqtt")]
    engine: String,

    /// Engine connect options as KEY=VALUE (repeatable)
    #[arg(long, value_parser = clap::builder::NonEmptyStringValueParser::new())]
    connect: Vec<String>,

    /// Prefix for broker-side client ids
    #[arg(long, default_value = "mq-pubbench")]
    client_prefix: String,

    /// Per-publish acknowledgement timeout in milliseconds
    #[arg(long, default_value = "10000")]
    ack_timeout_ms: u64,

    /// Give up on clients that have not finished after this many seconds (0 = wait forever)
    #[arg(long, default_value = "0")]
    deadline_secs: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn bench_config(&self) -> Result<BenchConfig> {
        let engine = parse_engine(&self.engine)
            .ok_or_else(|| anyhow!("unknown engine '{}'", self.engine))?;
        let qos = parse_qos(self.qos)?;
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        let connect = ConnectOptions {
            broker_url: self.broker.clone(),
            username: non_empty(&self.username),
            password: non_empty(&self.password),
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            params: parse_connect_kv(&self.connect),
            ..ConnectOptions::default()
        };
        Ok(BenchConfig {
            engine,
            connect,
            client_id_prefix: self.client_prefix.clone(),
            topic: self.topic.clone(),
            payload_size: self.size,
            msg_count: self.count,
            qos,
            clients: self.clients,
            quiet: self.quiet,
            deadline: (self.deadline_secs > 0).then(|| Duration::from_secs(self.deadline_secs)),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    mq_pubbench::logging::init(&cli.log_level)?;

    let format =
        Format::parse(&cli.format).ok_or_else(|| anyhow!("unknown format '{}'", cli.format))?;
    let bench = cli.bench_config()?;
    let connector = TransportBuilder::connector(bench.engine.clone(), &bench.connect)?;

    tracing::info!(
        engine = ?bench.engine,
        broker = %bench.connect.broker_url,
        clients = bench.clients,
        count = bench.msg_count,
        size = bench.payload_size,
        qos = %bench.qos,
        "mq-pubbench starting"
    );

    let report = run_fleet(bench.client_configs(), connector, bench.deadline).await?;
    print!("{}", render(&report, format));
    Ok(())
}
