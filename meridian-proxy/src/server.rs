//! Client-facing HTTP server.
//!
//! Streaming requests are observed by the session adapter, fetched from the
//! origin and handed back to the adapter before the response goes out. Requests
//! for `/loadbalancer` answer the diagnostic views in-band.

use std::convert::Infallible;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{
    HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING,
};
use hyper::http::uri::{Authority, PathAndQuery};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use meridian_admin::AdminServer;
use meridian_filters::{MARKER_HEADER, ORIGIN_HEADER, SESSION_ID_HEADER};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::adapter::{RedirectTarget, RequestContext, SessionAdapter};
use crate::config::ProxyConfig;
use crate::connection_pool::UpstreamClient;
use crate::error::ProxyError;

/// Path answered by the diagnostic views.
pub const LOAD_BALANCER_PATH: &str = "/loadbalancer";

/// Everything a request handler needs.
#[derive(Debug)]
pub struct FrontState<A> {
    /// Session hooks
    pub adapter: A,
    /// In-band diagnostic views
    pub admin: AdminServer,
    /// Client for origin fetches
    pub upstream: UpstreamClient,
    /// Absolute `http` origin
    pub origin: Uri,
    /// Loaded settings
    pub config: Arc<ProxyConfig>,
}

/// Accept client connections on `listener` until an accept fails.
pub async fn serve<A>(
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    state: Arc<FrontState<A>>,
) -> Result<(), ProxyError>
where
    A: SessionAdapter + 'static,
{
    info!(addr = ?listener.local_addr().ok(), tls = tls_acceptor.is_some(), "front server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();

        if let Some(acceptor) = &tls_acceptor {
            let acceptor = acceptor.clone();
            tokio::task::spawn(async move {
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => serve_connection(tls_stream, state).await,
                    Err(err) => debug!(%peer, error = %err, "TLS handshake failed"),
                }
            });
        } else {
            tokio::task::spawn(serve_connection(stream, state));
        }
    }
}

async fn serve_connection<S, A>(stream: S, state: Arc<FrontState<A>>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    A: SessionAdapter + 'static,
{
    let service = service_fn(move |req| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(handle_request(&state, req).await) }
    });
    if let Err(err) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(error = %err, "client connection closed with error");
    }
}

async fn handle_request<A: SessionAdapter>(
    state: &FrontState<A>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    debug!(method = %req.method(), uri = %req.uri(), "request received");

    if req.method() != Method::GET {
        return text(StatusCode::METHOD_NOT_ALLOWED, "only GET is supported");
    }
    if req.uri().path() == LOAD_BALANCER_PATH {
        return state.admin.respond(req.uri().query());
    }

    let host = req
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok());
    let port = host
        .and_then(|host| host.parse::<Authority>().ok())
        .and_then(|authority| authority.port_u16());
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(PathAndQuery::as_str)
        .unwrap_or("/");
    let original_url = match host {
        Some(host) => format!("http://{host}{path_and_query}"),
        None => path_and_query.to_string(),
    };
    let ctx = RequestContext::new(state.config.vhost_for_host(host), path_and_query)
        .with_origin(port, original_url);

    let target = match state.adapter.on_request_observed(&ctx).await {
        Ok(target) => target,
        Err(rejection) => return text(rejection.status, &rejection.reason),
    };

    let origin_uri = match origin_target(&state.origin, path_and_query) {
        Ok(uri) => uri,
        Err(err) => {
            warn!(path = %path_and_query, error = %err, "cannot build origin URI");
            return text(StatusCode::BAD_REQUEST, "invalid request path");
        }
    };
    let upstream = match state.upstream.get(&origin_uri).await {
        Ok(upstream) => upstream,
        Err(err) => {
            error!(uri = %origin_uri, error = %err, "origin fetch failed");
            return text(StatusCode::BAD_GATEWAY, "origin unavailable");
        }
    };

    let body = state
        .adapter
        .on_response_ready(&ctx, target.as_ref(), upstream.body);

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = upstream.status;
    let headers = response.headers_mut();
    for (name, value) in upstream.headers.iter() {
        if name != CONTENT_LENGTH && name != TRANSFER_ENCODING && name != CONNECTION {
            headers.append(name.clone(), value.clone());
        }
    }
    if let Some(target) = &target {
        add_marker_headers(headers, target, &ctx);
    }
    response
}

fn add_marker_headers(headers: &mut hyper::HeaderMap, target: &RedirectTarget, ctx: &RequestContext) {
    let mut markers = vec![
        (MARKER_HEADER, target.host.clone()),
        (ORIGIN_HEADER, ctx.original_url.clone()),
    ];
    if let Some(session_id) = target.session_id {
        markers.push((SESSION_ID_HEADER, session_id.to_string()));
    }
    for (header, value) in markers {
        match (
            HeaderName::from_bytes(header.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header, value = %value, "marker header dropped"),
        }
    }
}

/// The origin URI for a client request, keeping any path prefix of the origin.
pub fn origin_target(origin: &Uri, path_and_query: &str) -> Result<Uri, hyper::http::Error> {
    let prefix = origin.path().trim_end_matches('/');
    let mut builder = Uri::builder().path_and_query(format!("{prefix}{path_and_query}"));
    if let Some(scheme) = origin.scheme() {
        builder = builder.scheme(scheme.clone());
    }
    if let Some(authority) = origin.authority() {
        builder = builder.authority(authority.clone());
    }
    builder.build()
}

fn text(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
