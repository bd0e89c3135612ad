//! Run configuration: fleet-wide settings and the per-client view derived from them.

use bytes::Bytes;
use std::time::Duration;

use crate::payload::generate_payload;
use crate::transport::{ConnectOptions, Engine, QoS};

/// Everything one simulated client needs. Immutable once the client starts.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub id: u32,
    pub connect: ConnectOptions,
    /// Prefix for the broker-side client id
    pub client_id_prefix: String,
    pub topic: String,
    pub payload: Bytes,
    pub msg_count: u64,
    pub qos: QoS,
    /// Suppress connection and progress notices
    pub quiet: bool,
}

impl ClientConfig {
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Broker-side id, unique per connection attempt.
    pub fn broker_client_id(&self) -> String {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}-{}", self.client_id_prefix, self.id, &nonce[..8])
    }
}

#[derive(Clone, Debug)]
pub struct BenchConfig {
    pub engine: Engine,
    pub connect: ConnectOptions,
    pub client_id_prefix: String,
    pub topic: String,
    pub payload_size: usize,
    pub msg_count: u64,
    pub qos: QoS,
    pub clients: u32,
    pub quiet: bool,
    /// Give up waiting for stragglers after this long
    pub deadline: Option<Duration>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            engine: Engine::Mqtt,
            connect: ConnectOptions::default(),
            client_id_prefix: "mq-pubbench".into(),
            topic: "/test".into(),
            payload_size: 100,
            msg_count: 100,
            qos: QoS::AtMostOnce,
            clients: 10,
            quiet: false,
            deadline: None,
        }
    }
}

impl BenchConfig {
    /// One config per simulated client, ids `0..clients`.
    pub fn client_configs(&self) -> Vec<ClientConfig> {
        let payload = generate_payload(self.payload_size);
        (0..self.clients)
            .map(|id| ClientConfig {
                id,
                connect: self.connect.clone(),
                client_id_prefix: self.client_id_prefix.clone(),
                topic: self.topic.clone(),
                payload: payload.clone(),
                msg_count: self.msg_count,
                qos: self.qos,
                quiet: self.quiet,
            })
            .collect()
    }
}
