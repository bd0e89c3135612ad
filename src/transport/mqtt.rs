//! MQTT adapter (feature `transport-mqtt`), using rumqttc (async).
//!
//! One `AsyncClient` + event loop per connection. A background poller keeps
//! the event loop running, forwards acknowledgements to the publishing side
//! and reconnects after failures when `auto_reconnect` is set.
use crate::transport::config::parse_broker_url;
use crate::transport::{
    ConnectOptions, Connection, ConnectionHandlers, Connector, QoS, TransportError,
};
use bytes::Bytes;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, Incoming, MqttOptions, Outgoing};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

const DEFAULT_PORT: u16 = 1883;
const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

impl From<QoS> for rumqttc::QoS {
    fn from(q: QoS) -> Self {
        match q {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Progress of a publish as seen by the event loop.
#[derive(Debug)]
enum AckEvent {
    /// Publish packet written to the socket (the only ack QoS 0 gets)
    Written(u16),
    /// QoS 1: PUBACK received
    PubAck(u16),
    /// QoS 2: PUBCOMP received (full handshake complete)
    PubComp(u16),
    /// Connection dropped while waiting
    Lost(String),
}

/// Matches event loop progress to the publish currently in flight.
///
/// The packet id comes from this publish's own `Written` event; acks for any
/// other id (late acks of a timed-out publish) are skipped.
#[derive(Debug)]
struct AckWaiter {
    qos: QoS,
    pkid: Option<u16>,
}

impl AckWaiter {
    fn new(qos: QoS) -> Self {
        Self { qos, pkid: None }
    }

    fn settles(&self, qos: QoS, pkid: u16) -> bool {
        self.qos == qos && self.pkid == Some(pkid)
    }

    /// `Some` once the publish is settled.
    fn on_event(&mut self, ev: AckEvent) -> Option<Result<(), TransportError>> {
        match ev {
            AckEvent::Written(pkid) if self.pkid.is_none() => {
                if self.qos == QoS::AtMostOnce {
                    return Some(Ok(()));
                }
                self.pkid = Some(pkid);
                None
            }
            AckEvent::PubAck(pkid) if self.settles(QoS::AtLeastOnce, pkid) => Some(Ok(())),
            AckEvent::PubComp(pkid) if self.settles(QoS::ExactlyOnce, pkid) => Some(Ok(())),
            AckEvent::Lost(reason) => Some(Err(TransportError::Publish(format!(
                "connection lost: {}",
                reason
            )))),
            _ => None,
        }
    }
}

pub struct MqttConnector;

#[async_trait::async_trait]
impl Connector for MqttConnector {
    async fn connect(
        &self,
        opts: &ConnectOptions,
        client_id: &str,
        handlers: ConnectionHandlers,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let (host, port) = parse_broker_url(&opts.broker_url, DEFAULT_PORT)?;
        let keep_alive = Duration::from_secs(param(opts, "keep_alive_secs").unwrap_or(30));
        // 2 MiB default to comfortably allow large payloads
        let max_packet = param(opts, "max_packet").unwrap_or(2 * 1024 * 1024) as usize;
        let connect_timeout =
            Duration::from_millis(param(opts, "connect_timeout_ms").unwrap_or(10_000));

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(keep_alive);
        options.set_clean_session(opts.clean_session);
        options.set_max_packet_size(max_packet, max_packet);
        if let Some((user, pass)) = opts.credentials() {
            options.set_credentials(user, pass);
        }
        let (client, mut eventloop) = AsyncClient::new(options, 64);

        // Drive the event loop until CONNACK so a bad broker fails here, not on first publish
        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                        return if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(TransportError::Connect(format!("broker refused: {:?}", ack.code)))
                        };
                    }
                    Ok(_) => {}
                    Err(e) => return Err(TransportError::Connect(e.to_string())),
                }
            }
        };
        match tokio::time::timeout(connect_timeout, handshake).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(TransportError::Connect("handshake timed out".into())),
        }
        handlers.connected();

        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let auto_reconnect = opts.auto_reconnect;
        let poller_id = client_id.to_string();
        let poller = tokio::spawn(async move {
            let mut connected = true;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        if !connected {
                            connected = true;
                            handlers.connected();
                        }
                    }
                    Ok(Event::Incoming(Incoming::PubAck(ack))) => {
                        let _ = ack_tx.send(AckEvent::PubAck(ack.pkid));
                    }
                    Ok(Event::Incoming(Incoming::PubComp(comp))) => {
                        let _ = ack_tx.send(AckEvent::PubComp(comp.pkid));
                    }
                    Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                        let _ = ack_tx.send(AckEvent::Written(pkid));
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let reason = e.to_string();
                        if connected {
                            connected = false;
                            handlers.connection_lost(&reason);
                        }
                        let _ = ack_tx.send(AckEvent::Lost(reason));
                        if !auto_reconnect {
                            break;
                        }
                        // next poll() reconnects
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                    }
                }
            }
            debug!(client_id = %poller_id, "MQTT event loop stopped");
        });

        Ok(Box::new(MqttConnection {
            client,
            acks: Mutex::new(ack_rx),
            ack_timeout: opts.ack_timeout,
            poller,
        }))
    }
}

fn param(opts: &ConnectOptions, key: &str) -> Option<u64> {
    opts.params.get(key).and_then(|s| s.parse().ok())
}

struct MqttConnection {
    client: AsyncClient,
    acks: Mutex<mpsc::UnboundedReceiver<AckEvent>>,
    ack_timeout: Duration,
    poller: JoinHandle<()>,
}

#[async_trait::async_trait]
impl Connection for MqttConnection {
    async fn publish(&self, topic: &str, qos: QoS, payload: Bytes) -> Result<(), TransportError> {
        // Holding the receiver keeps one publish in flight per connection
        let mut acks = self.acks.lock().await;
        // Leftovers from an earlier timed-out publish belong to nobody
        while acks.try_recv().is_ok() {}

        self.client
            .publish(topic, qos.into(), false, payload.to_vec())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;

        let mut waiter = AckWaiter::new(qos);
        let wait = async {
            loop {
                match acks.recv().await {
                    Some(ev) => {
                        if let Some(res) = waiter.on_event(ev) {
                            return res;
                        }
                    }
                    None => return Err(TransportError::Disconnected),
                }
            }
        };
        match tokio::time::timeout(self.ack_timeout, wait).await {
            Ok(res) => res,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        if self.client.disconnect().await.is_err() {
            self.poller.abort();
            return Ok(());
        }
        // Let the poller flush DISCONNECT before the client is dropped
        let started = Instant::now();
        while !self.poller.is_finished() && started.elapsed() < Duration::from_secs(1) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.poller.abort();
        Ok(())
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_maps_to_rumqttc() {
        assert_eq!(rumqttc::QoS::from(QoS::AtMostOnce), rumqttc::QoS::AtMostOnce);
        assert_eq!(rumqttc::QoS::from(QoS::AtLeastOnce), rumqttc::QoS::AtLeastOnce);
        assert_eq!(rumqttc::QoS::from(QoS::ExactlyOnce), rumqttc::QoS::ExactlyOnce);
    }

    #[test]
    fn late_ack_of_previous_publish_is_ignored() {
        let mut waiter = AckWaiter::new(QoS::AtLeastOnce);
        // ack for a timed-out publish arriving before this one is written
        assert!(waiter.on_event(AckEvent::PubAck(1)).is_none());
        assert!(waiter.on_event(AckEvent::Written(2)).is_none());
        // ... and after
        assert!(waiter.on_event(AckEvent::PubAck(1)).is_none());
        assert_eq!(waiter.on_event(AckEvent::PubAck(2)), Some(Ok(())));
    }

    #[test]
    fn exactly_once_waits_for_matching_pubcomp() {
        let mut waiter = AckWaiter::new(QoS::ExactlyOnce);
        assert!(waiter.on_event(AckEvent::Written(7)).is_none());
        assert!(waiter.on_event(AckEvent::PubAck(7)).is_none());
        assert!(waiter.on_event(AckEvent::PubComp(6)).is_none());
        assert_eq!(waiter.on_event(AckEvent::PubComp(7)), Some(Ok(())));
    }

    #[test]
    fn at_most_once_settles_on_write() {
        let mut waiter = AckWaiter::new(QoS::AtMostOnce);
        assert_eq!(waiter.on_event(AckEvent::Written(0)), Some(Ok(())));
    }

    #[test]
    fn connection_loss_fails_the_publish() {
        let mut waiter = AckWaiter::new(QoS::AtLeastOnce);
        assert!(waiter.on_event(AckEvent::Written(3)).is_none());
        assert!(matches!(
            waiter.on_event(AckEvent::Lost("reset".into())),
            Some(Err(TransportError::Publish(_)))
        ));
    }

    #[tokio::test]
    async fn bad_scheme_fails_before_dialing() {
        let opts = ConnectOptions {
            broker_url: "ws://localhost:1883".into(),
            ..ConnectOptions::default()
        };
        let res = MqttConnector
            .connect(&opts, "test-client", ConnectionHandlers::noop())
            .await;
        assert!(matches!(res, Err(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn unreachable_broker_is_a_connect_error() {
        let mut opts = ConnectOptions {
            broker_url: "tcp://127.0.0.1:1".into(),
            ..ConnectOptions::default()
        };
        opts.params.insert("connect_timeout_ms".into(), "2000".into());
        let res = MqttConnector
            .connect(&opts, "test-client", ConnectionHandlers::noop())
            .await;
        assert!(matches!(res, Err(TransportError::Connect(_))));
    }
}
