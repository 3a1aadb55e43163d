//! HTTP/1.1 over a Unix socket.

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use meridian_core::SharedServerPool;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::{render, AdminError, InfoQuery};

/// Knobs for the diagnostic views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSettings {
    /// Honour `serverInfo` and `serverInfoJSON` queries
    pub enable_server_info: bool,
    /// Virtual host used when the query names none
    pub default_vhost: String,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            enable_server_info: false,
            default_vhost: "_defaultVHost_".to_string(),
        }
    }
}

/// Serves the diagnostic views for one server pool.
#[derive(Debug, Clone)]
pub struct AdminServer {
    pool: SharedServerPool,
    settings: Arc<AdminSettings>,
}

impl AdminServer {
    /// Create a server over `pool`.
    pub fn new(pool: SharedServerPool, settings: AdminSettings) -> Self {
        Self {
            pool,
            settings: Arc::new(settings),
        }
    }

    /// Answer one request given its raw query string.
    ///
    /// The percent-decoded `vhost` parameter picks the virtual host; otherwise the
    /// default one is used.
    pub fn respond(&self, query: Option<&str>) -> Response<Full<Bytes>> {
        let view = InfoQuery::parse(query, self.settings.enable_server_info);
        let vhost = query
            .and_then(vhost_param)
            .unwrap_or_else(|| self.settings.default_vhost.clone());

        match render(view, &self.pool, &vhost) {
            Ok(rendered) => Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, rendered.content_type)
                .body(Full::new(Bytes::from(rendered.body)))
                .unwrap_or_else(|_| status_only(StatusCode::INTERNAL_SERVER_ERROR)),
            Err(err) => {
                error!(error = %err, "failed to render admin view");
                status_only(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Accept connections on the Unix socket at `path` until an accept fails.
    ///
    /// A stale socket file left by a previous run is removed first.
    pub async fn serve_unix(self, path: impl AsRef<Path>) -> Result<(), AdminError> {
        let path = path.as_ref();
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "removed stale admin socket"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let listener = UnixListener::bind(path)?;
        info!(path = %path.display(), "admin socket listening");
        let mut incoming = UnixListenerStream::new(listener);

        while let Some(stream) = incoming.next().await {
            let stream = stream?;
            let admin = self.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let admin = admin.clone();
                    async move { Ok::<_, Infallible>(admin.handle(req)) }
                });
                if let Err(err) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    warn!(error = %err, "admin connection failed");
                }
            });
        }
        Ok(())
    }

    fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        if req.method() != Method::GET {
            return status_only(StatusCode::METHOD_NOT_ALLOWED);
        }
        self.respond(req.uri().query())
    }
}

fn vhost_param(query: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "vhost")
        .map(|(_, vhost)| vhost.into_owned())
        .filter(|vhost| !vhost.is_empty())
}

fn status_only(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
