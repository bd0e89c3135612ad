//! Parsing helpers for engine selection, QoS and broker addresses.

use std::collections::BTreeMap;

use super::{Engine, QoS, TransportError};

pub fn parse_engine(s: &str) -> Option<Engine> {
    match s.to_ascii_lowercase().as_str() {
        "mqtt" => Some(Engine::Mqtt),
        #[cfg(any(test, feature = "transport-mock"))]
        "mock" => Some(Engine::Mock),
        _ => None,
    }
}

pub fn parse_qos(level: u8) -> Result<QoS, TransportError> {
    QoS::from_level(level)
        .ok_or_else(|| TransportError::Other(format!("invalid qos level {}", level)))
}

/// Collect repeated `KEY=VALUE` arguments; entries without `=` are ignored.
pub fn parse_connect_kv(items: &[String]) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for item in items {
        if let Some((k, v)) = item.split_once('=') {
            let k = k.trim();
            if !k.is_empty() {
                params.insert(k.to_string(), v.trim().to_string());
            }
        }
    }
    params
}

/// Split `tcp://host:port` (also `mqtt://`, or a bare `host[:port]`) into parts.
pub fn parse_broker_url(url: &str, default_port: u16) -> Result<(String, u16), TransportError> {
    let rest = match url.split_once("://") {
        Some((scheme, rest)) => match scheme {
            "tcp" | "mqtt" => rest,
            other => {
                return Err(TransportError::Connect(format!(
                    "unsupported broker scheme '{}'",
                    other
                )))
            }
        },
        None => url,
    };
    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        return Err(TransportError::Connect(format!("missing broker host in '{}'", url)));
    }
    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| TransportError::Connect(format!("invalid broker port in '{}'", url)))?;
            if host.is_empty() {
                return Err(TransportError::Connect(format!("missing broker host in '{}'", url)));
            }
            Ok((host.to_string(), port))
        }
        None => Ok((rest.to_string(), default_port)),
    }
}
