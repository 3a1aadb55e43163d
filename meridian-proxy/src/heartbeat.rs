//! Heartbeat intake over HTTP.
//!
//! Edge servers `POST /heartbeat` with either a flat record,
//! `{"serverId": "...", "values": {"outRate": "1200", ...}}`, or the typed form
//! where every field sits at the top level. A shared key, when configured, must
//! arrive in `X-LoadBalancer-Key`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use meridian_core::{Heartbeat, HeartbeatError, SharedServerPool};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::ProxyError;

/// Header carrying the shared listener key.
pub const LISTENER_KEY_HEADER: &str = "X-LoadBalancer-Key";

/// Path heartbeats are posted to.
pub const HEARTBEAT_PATH: &str = "/heartbeat";

const MAX_HEARTBEAT_BYTES: usize = 64 * 1024;

/// Flat record form.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatEnvelope {
    server_id: String,
    values: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HeartbeatBody {
    Record(HeartbeatEnvelope),
    Typed(Heartbeat),
}

impl HeartbeatBody {
    fn into_heartbeat(self) -> Result<Heartbeat, HeartbeatError> {
        match self {
            Self::Record(envelope) => {
                let values = envelope
                    .values
                    .into_iter()
                    .filter_map(|(key, value)| record_value(value).map(|value| (key, value)))
                    .collect();
                Heartbeat::from_record(&envelope.server_id, &values)
            }
            Self::Typed(mut heartbeat) => {
                let server_id = heartbeat.server_id.trim();
                if server_id.is_empty() {
                    return Err(HeartbeatError::MissingServerId);
                }
                heartbeat.server_id = server_id.to_string();
                Ok(heartbeat)
            }
        }
    }
}

/// Record values are strings; nested blocks travel as their JSON text.
fn record_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Receives heartbeats for one pool.
#[derive(Debug, Clone)]
pub struct HeartbeatListener {
    pool: SharedServerPool,
    key: Option<Arc<str>>,
}

impl HeartbeatListener {
    /// Create a listener feeding `pool`, requiring `key` when set.
    pub fn new(pool: SharedServerPool, key: Option<String>) -> Self {
        Self {
            pool,
            key: key.filter(|key| !key.is_empty()).map(Arc::from),
        }
    }

    /// Accept heartbeat connections until an accept fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ProxyError> {
        info!(addr = ?listener.local_addr().ok(), "heartbeat listener started");
        loop {
            let (stream, peer) = listener.accept().await?;
            let intake = self.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let intake = intake.clone();
                    async move { Ok::<_, Infallible>(intake.handle(req).await) }
                });
                if let Err(err) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!(%peer, error = %err, "heartbeat connection closed with error");
                }
            });
        }
    }

    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        if req.uri().path() != HEARTBEAT_PATH {
            return reply(StatusCode::NOT_FOUND, "not found");
        }
        if req.method() != Method::POST {
            return reply(StatusCode::METHOD_NOT_ALLOWED, "POST only");
        }
        if let Some(expected) = &self.key {
            let presented = req
                .headers()
                .get(LISTENER_KEY_HEADER)
                .and_then(|value| value.to_str().ok());
            if presented != Some(&**expected) {
                warn!("heartbeat rejected, listener key mismatch");
                return reply(StatusCode::FORBIDDEN, "bad listener key");
            }
        }

        let body = match Limited::new(req.into_body(), MAX_HEARTBEAT_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                warn!(error = %err, "heartbeat body unreadable");
                return reply(StatusCode::BAD_REQUEST, "unreadable body");
            }
        };

        match self.accept(&body) {
            Ok(status) => reply(StatusCode::OK, status.as_str()),
            Err(reason) => reply(StatusCode::BAD_REQUEST, &reason),
        }
    }

    /// Parse and apply one heartbeat body, returning the server's new status.
    fn accept(&self, body: &[u8]) -> Result<meridian_core::ServerStatus, String> {
        let parsed: HeartbeatBody = serde_json::from_slice(body).map_err(|err| {
            debug!(error = %err, "malformed heartbeat");
            format!("malformed heartbeat: {err}")
        })?;
        let heartbeat = parsed.into_heartbeat().map_err(|err| {
            debug!(error = %err, "heartbeat rejected");
            err.to_string()
        })?;
        debug!(server_id = %heartbeat.server_id, "heartbeat received");
        Ok(self.pool.on_heartbeat(heartbeat))
    }
}

fn reply(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::{PoolConfig, ServerPool, ServerStatus};

    fn listener(key: Option<&str>) -> (Arc<ServerPool>, HeartbeatListener) {
        let pool = Arc::new(ServerPool::new(PoolConfig::default()));
        let intake = HeartbeatListener::new(pool.clone(), key.map(str::to_string));
        (pool, intake)
    }

    #[test]
    fn test_flat_record_with_nested_block() {
        let (pool, intake) = listener(None);
        let body = br#"{
            "serverId": "edge-1",
            "values": {
                "status": "1",
                "outRate": 1000,
                "redirect": "edge1.example",
                "customProperties": {"weight": 2, "vhosts": {"sports": {"redirectAddress": "sports.example"}}}
            }
        }"#;

        assert_eq!(intake.accept(body), Ok(ServerStatus::Running));
        let server = pool.candidate("edge-1").unwrap();
        assert_eq!(server.weight, 2);
        assert_eq!(server.redirect_address("sports").as_deref(), Some("sports.example"));
        assert_eq!(server.redirect_address("other").as_deref(), Some("edge1.example"));
    }

    #[test]
    fn test_typed_form() {
        let (pool, intake) = listener(None);
        let body = br#"{"serverId": "edge-2", "outRate": "500", "status": 1, "redirect": "edge2"}"#;

        assert_eq!(intake.accept(body), Ok(ServerStatus::Running));
        assert!(pool.is_eligible("edge-2"));
    }

    #[test]
    fn test_typed_form_with_loose_values() {
        let (pool, intake) = listener(None);

        let body = br#"{"serverId": "edge-4", "status": "1", "redirect": ""}"#;
        assert_eq!(intake.accept(body), Ok(ServerStatus::Running));
        assert!(pool.is_eligible("edge-4"));
        assert_eq!(pool.candidate("edge-4").unwrap().default_address, None);

        let body = br#"{"serverId": "edge-5", "status": 1, "redirect": 42,
                        "customProperties": {"weight": 3, "vhosts": {"live": 5}}}"#;
        assert_eq!(intake.accept(body), Ok(ServerStatus::Running));
        let server = pool.candidate("edge-5").unwrap();
        assert_eq!(server.weight, 3);
        assert_eq!(server.default_address, None);
        assert!(server.address_by_vhost.unwrap().is_empty());
    }

    #[test]
    fn test_bad_fields_do_not_reject_the_heartbeat() {
        let (pool, intake) = listener(None);
        let body = br#"{"serverId": "edge-3", "values": {"status": "1", "outRate": "lots", "connectCount": null}}"#;

        assert_eq!(intake.accept(body), Ok(ServerStatus::Running));
        assert_eq!(pool.candidate("edge-3").unwrap().out_rate, -1);
    }

    #[test]
    fn test_missing_server_id_is_rejected() {
        let (pool, intake) = listener(None);
        assert!(intake.accept(br#"{"serverId": "  ", "values": {}}"#).is_err());
        assert!(intake.accept(b"not json").is_err());
        assert_eq!(pool.known_count(), 0);
    }

    #[tokio::test]
    async fn test_over_http_with_key() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (pool, intake) = listener(Some("s3cret"));
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        tokio::spawn(intake.serve(tcp));

        async fn post(addr: std::net::SocketAddr, key: &str) -> String {
            let body = r#"{"serverId":"edge-9","values":{"status":"1"}}"#;
            let request = format!(
                "POST /heartbeat HTTP/1.1\r\nHost: lb\r\nX-LoadBalancer-Key: {key}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            stream.write_all(request.as_bytes()).await.unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();
            response
        }

        let denied = post(addr, "wrong").await;
        assert!(denied.starts_with("HTTP/1.1 403"));
        assert_eq!(pool.known_count(), 0);

        let accepted = post(addr, "s3cret").await;
        assert!(accepted.starts_with("HTTP/1.1 200"));
        assert!(pool.is_eligible("edge-9"));
    }
}
