//! GET requests to the origin and to edge servers over pooled connections.

use std::time::Duration;

use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::header::HOST;
use hyper::{HeaderMap, Method, Request, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::connection_pool::pool::{ConnectionPool, Sender};
use crate::error::UpstreamError;

/// A fully read upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// Status line code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Complete body
    pub body: Bytes,
}

/// Minimal HTTP/1.1 client over a [`ConnectionPool`].
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    pool: ConnectionPool,
    timeout: Duration,
}

impl UpstreamClient {
    /// Create a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            pool: ConnectionPool::new(),
            timeout,
        }
    }

    /// GET `uri` and read the whole response.
    pub async fn get(&self, uri: &Uri) -> Result<UpstreamResponse, UpstreamError> {
        match tokio::time::timeout(self.timeout, self.send(uri)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(self.timeout)),
        }
    }

    async fn send(&self, uri: &Uri) -> Result<UpstreamResponse, UpstreamError> {
        if uri.scheme_str() != Some("http") {
            return Err(UpstreamError::UnsupportedScheme(uri.to_string()));
        }
        let host = uri
            .host()
            .ok_or_else(|| UpstreamError::MissingHost(uri.to_string()))?;
        let authority = format!("{host}:{}", uri.port_u16().unwrap_or(80));

        let mut sender = match self.pool.try_pop(&authority) {
            Some(mut pooled) => match pooled.ready().await {
                Ok(()) => {
                    trace!(%authority, "reusing pooled connection");
                    pooled
                }
                Err(_) => self.connect(&authority).await?,
            },
            None => self.connect(&authority).await?,
        };
        sender.ready().await?;

        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let host_header = uri.authority().map(|a| a.as_str()).unwrap_or(host);
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header(HOST, host_header)
            .body(Empty::<Bytes>::new())?;

        let response = sender.send_request(request).await?;
        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();
        self.pool.push(&authority, sender);
        trace!(%authority, idle = self.pool.idle_count(&authority), "connection returned to pool");

        debug!(%uri, status = %parts.status, bytes = body.len(), "upstream response");
        Ok(UpstreamResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    async fn connect(&self, authority: &str) -> Result<Sender, UpstreamError> {
        let stream = TcpStream::connect(authority)
            .await
            .map_err(|source| UpstreamError::Connect {
                authority: authority.to_string(),
                source,
            })?;
        let (sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        let authority = authority.to_string();
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                debug!(%authority, error = %err, "upstream connection closed with error");
            }
        });
        Ok(sender)
    }
}
