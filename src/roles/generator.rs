use bytes::Bytes;
use tracing::debug;

use crate::config::ClientConfig;
use crate::message::Message;
use crate::transport::QoS;

/// Produces the client's fixed-size message stream.
pub struct Generator {
    client: u32,
    topic: String,
    qos: QoS,
    payload: Bytes,
    count: u64,
}

impl Generator {
    pub fn from_config(cfg: &ClientConfig) -> Self {
        Self {
            client: cfg.id,
            topic: cfg.topic.clone(),
            qos: cfg.qos,
            payload: cfg.payload.clone(),
            count: cfg.msg_count,
        }
    }

    /// Send `count` messages, then close the channel.
    ///
    /// Closing `out` (by dropping it on return) is the completion signal, so
    /// it happens exactly once. Each send waits for the publisher to take the
    /// message. Stops early if the publisher has gone away. Returns the number
    /// of messages handed over.
    pub async fn run(self, out: flume::Sender<Message>) -> u64 {
        let mut produced = 0u64;
        for _ in 0..self.count {
            let msg = Message::new(self.topic.clone(), self.qos, self.payload.clone());
            if out.send_async(msg).await.is_err() {
                debug!(client = self.client, produced, "publisher gone, generator stopping");
                break;
            }
            produced += 1;
        }
        debug!(client = self.client, produced, "generator done");
        produced
    }
}
