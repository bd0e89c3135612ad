//! Broker boundary: connect and publish-with-acknowledgement capabilities.
//!
//! The pipeline only sees [`Connector`] and [`Connection`]. Adapters own the
//! protocol handshake, acknowledgement tracking and automatic reconnection.

pub mod config;
#[cfg(any(test, feature = "transport-mock"))]
pub mod mock;
#[cfg(feature = "transport-mqtt")]
pub mod mqtt;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Engine {
    Mqtt,
    #[cfg(any(test, feature = "transport-mock"))]
    Mock,
}

/// Delivery guarantee requested for a publish.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

#[derive(Clone, Debug)]
pub struct ConnectOptions {
    /// Broker address, e.g. `tcp://localhost:1883`
    pub broker_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub clean_session: bool,
    pub auto_reconnect: bool,
    /// How long a single publish may wait for its acknowledgement
    pub ack_timeout: Duration,
    /// Engine specific knobs (KEY=VALUE from the command line)
    pub params: BTreeMap<String, String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            broker_url: "tcp://localhost:1883".into(),
            username: None,
            password: None,
            clean_session: true,
            auto_reconnect: true,
            ack_timeout: Duration::from_secs(10),
            params: BTreeMap::new(),
        }
    }
}

impl ConnectOptions {
    /// Credentials are only used when both parts are present and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect: {0}")]
    Connect(String),
    #[error("publish: {0}")]
    Publish(String),
    #[error("timeout")]
    Timeout,
    #[error("disconnected")]
    Disconnected,
    #[error("other: {0}")]
    Other(String),
}

type ConnectedFn = dyn Fn() + Send + Sync + 'static;
type ConnectionLostFn = dyn Fn(&str) + Send + Sync + 'static;

/// Caller supplied notifications for connection lifecycle events.
///
/// `on_connected` fires once per successful handshake (including every
/// automatic reconnect). `on_connection_lost` fires asynchronously with a
/// reason; reconnecting is the adapter's job.
#[derive(Clone)]
pub struct ConnectionHandlers {
    on_connected: Arc<ConnectedFn>,
    on_connection_lost: Arc<ConnectionLostFn>,
}

impl ConnectionHandlers {
    pub fn new(
        on_connected: impl Fn() + Send + Sync + 'static,
        on_connection_lost: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_connected: Arc::new(on_connected),
            on_connection_lost: Arc::new(on_connection_lost),
        }
    }

    pub fn noop() -> Self {
        Self::new(|| {}, |_| {})
    }

    pub fn connected(&self) {
        (self.on_connected)()
    }

    pub fn connection_lost(&self, reason: &str) {
        (self.on_connection_lost)(reason)
    }
}

impl fmt::Debug for ConnectionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandlers").finish()
    }
}

#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Open one broker connection. Resolves after the handshake completes;
    /// a failed handshake is a [`TransportError::Connect`].
    async fn connect(
        &self,
        opts: &ConnectOptions,
        client_id: &str,
        handlers: ConnectionHandlers,
    ) -> Result<Box<dyn Connection>, TransportError>;
}

#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    /// Publish and suspend until the broker acknowledges or the attempt fails.
    async fn publish(&self, topic: &str, qos: QoS, payload: Bytes) -> Result<(), TransportError>;
    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub struct TransportBuilder;

impl TransportBuilder {
    pub fn connector(
        engine: Engine,
        opts: &ConnectOptions,
    ) -> Result<Arc<dyn Connector>, TransportError> {
        match engine {
            Engine::Mqtt => {
                #[cfg(feature = "transport-mqtt")]
                {
                    let _ = opts;
                    Ok(Arc::new(crate::transport::mqtt::MqttConnector))
                }
                #[cfg(not(feature = "transport-mqtt"))]
                {
                    let _ = opts;
                    Err(TransportError::Connect("mqtt feature disabled".into()))
                }
            }
            #[cfg(any(test, feature = "transport-mock"))]
            Engine::Mock => Ok(Arc::new(crate::transport::mock::MockConnector::from_params(
                &opts.params,
            )?)),
        }
    }
}
