use crate::config::ClientConfig;
use crate::message::Message;
use crate::transport::{ConnectOptions, ConnectionHandlers, Connector};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Progress notice interval (messages).
pub const PROGRESS_EVERY: u64 = 100;

/// What the publisher reports to its client, in order.
#[derive(Debug)]
pub enum PublisherEvent {
    /// A message after its publish attempt (delivered or failed)
    Published(Message),
    /// The initial handshake failed; nothing will be published
    ConnectFailed(String),
    /// Generator finished and every message was forwarded. Always last.
    Finished { published: u64 },
}

pub struct Publisher {
    client: u32,
    broker_client_id: String,
    connect: ConnectOptions,
    quiet: bool,
    connector: Arc<dyn Connector>,
}

impl Publisher {
    pub fn new(cfg: &ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            client: cfg.id,
            broker_client_id: cfg.broker_client_id(),
            connect: cfg.connect.clone(),
            quiet: cfg.quiet,
            connector,
        }
    }

    fn handlers(&self) -> ConnectionHandlers {
        let client = self.client;
        let quiet = self.quiet;
        let broker = self.connect.broker_url.clone();
        ConnectionHandlers::new(
            move || {
                if !quiet {
                    info!(client, broker = %broker, "Client connected to the broker");
                }
            },
            move |reason| {
                warn!(
                    client,
                    reason = %reason,
                    "Client lost connection to the broker, will reconnect"
                );
            },
        )
    }

    /// Connect once, then publish messages strictly one at a time until the
    /// generator closes `input`.
    ///
    /// Every message is forwarded to `events` whether it succeeded or not.
    /// Failures are never retried. `Finished` is sent only after the last
    /// message, on the same channel, so the client can never see it early.
    pub async fn run(self, input: flume::Receiver<Message>, events: mpsc::Sender<PublisherEvent>) {
        let conn = match self
            .connector
            .connect(&self.connect, &self.broker_client_id, self.handlers())
            .await
        {
            Ok(c) => c,
            Err(e) => {
                error!(
                    client = self.client,
                    broker = %self.connect.broker_url,
                    error = %e,
                    "Client failed to connect to the broker"
                );
                let _ = events.send(PublisherEvent::ConnectFailed(e.to_string())).await;
                return;
            }
        };
        debug!(client = self.client, client_id = %self.broker_client_id, "Publisher running");

        let mut published = 0u64;
        while let Ok(mut msg) = input.recv_async().await {
            msg.mark_sent(Instant::now());
            match conn.publish(&msg.topic, msg.qos, msg.payload.clone()).await {
                Ok(()) => msg.mark_delivered(Instant::now()),
                Err(e) => {
                    warn!(client = self.client, error = %e, "Error sending message");
                    msg.mark_failed();
                }
            }
            if events.send(PublisherEvent::Published(msg)).await.is_err() {
                warn!(client = self.client, "Collector gone, publisher stopping");
                let _ = conn.shutdown().await;
                return;
            }
            published += 1;
            if !self.quiet && published % PROGRESS_EVERY == 0 {
                info!(
                    client = self.client,
                    published,
                    "Client published messages and keeps publishing"
                );
            }
        }

        let _ = events.send(PublisherEvent::Finished { published }).await;
        if !self.quiet {
            info!(client = self.client, published, "Client is done publishing");
        }
        if let Err(e) = conn.shutdown().await {
            debug!(client = self.client, error = %e, "Shutdown error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BenchConfig;
    use crate::transport::mock::MockConnector;

    fn cfg() -> ClientConfig {
        let bench = BenchConfig {
            clients: 1,
            msg_count: 0,
            quiet: true,
            ..BenchConfig::default()
        };
        bench.client_configs().remove(0)
    }

    async fn collect(mut rx: mpsc::Receiver<PublisherEvent>) -> Vec<PublisherEvent> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn forwards_every_message_then_finishes() {
        let cfg = cfg();
        let connector = Arc::new(MockConnector::new().with_failures(2..=2));
        let (msg_tx, msg_rx) = flume::bounded(0);
        let (ev_tx, ev_rx) = mpsc::channel(4);
        let publisher = tokio::spawn(Publisher::new(&cfg, connector).run(msg_rx, ev_tx));

        for _ in 0..3 {
            msg_tx
                .send_async(Message::new("t", cfg.qos, cfg.payload.clone()))
                .await
                .unwrap();
        }
        drop(msg_tx);

        let events = collect(ev_rx).await;
        publisher.await.unwrap();
        assert_eq!(events.len(), 4);
        let flags: Vec<bool> = events[..3]
            .iter()
            .map(|e| match e {
                PublisherEvent::Published(m) => m.is_error(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(flags, vec![false, true, false]);
        for e in &events[..3] {
            if let PublisherEvent::Published(m) = e {
                assert!(m.sent().is_some());
                assert_eq!(m.delivered().is_some(), !m.is_error());
            }
        }
        assert!(matches!(events[3], PublisherEvent::Finished { published: 3 }));
    }

    #[tokio::test]
    async fn connect_failure_is_reported_and_input_released() {
        let cfg = cfg();
        let connector = Arc::new(MockConnector::new().with_connect_error("bad credentials"));
        let (msg_tx, msg_rx) = flume::bounded(0);
        let (ev_tx, ev_rx) = mpsc::channel(4);
        Publisher::new(&cfg, connector).run(msg_rx, ev_tx).await;

        let events = collect(ev_rx).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            PublisherEvent::ConnectFailed(reason) => assert!(reason.contains("bad credentials")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(msg_tx
            .send_async(Message::new("t", cfg.qos, cfg.payload.clone()))
            .await
            .is_err());
    }
}
