//! Hooks the front server calls around each streaming request.
//!
//! A request is observed before it is forwarded: the adapter decides whether the
//! session is load balanced, picks an edge and builds the base URL manifests will
//! be rewritten against. Once the origin has answered, the response body passes
//! through the adapter again and is rewritten when the trigger rules allow.

use std::future::Future;

use hyper::body::Bytes;
use hyper::StatusCode;
use meridian_core::{RedirectDecision, SharedConfigCache, SharedServerPool};
use meridian_filters::{
    is_redirect_request, rewrite_manifest, should_rewrite, strip_port, BaseUrl, ManifestFormat,
};
use tracing::{debug, info, warn};

use crate::connection_pool::UpstreamClient;
use crate::session_probe::probe_session_id;

/// What the adapter needs to know about one client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Virtual host serving the request
    pub vhost: String,
    /// First path segment
    pub application: String,
    /// Request path, starting with `/`
    pub path: String,
    /// Raw query string
    pub query: Option<String>,
    /// Port the client addressed, from its `Host` header
    pub port: Option<u16>,
    /// The request URL as the client sent it
    pub original_url: String,
}

impl RequestContext {
    /// Build a context for `path` (which may carry a query) on `vhost`.
    pub fn new(vhost: impl Into<String>, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (path_and_query, None),
        };
        let application = path
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            vhost: vhost.into(),
            application,
            path: path.to_string(),
            query,
            port: None,
            original_url: path_and_query.to_string(),
        }
    }

    /// Record the port and URL the client used.
    pub fn with_origin(mut self, port: Option<u16>, original_url: impl Into<String>) -> Self {
        self.port = port;
        self.original_url = original_url.into();
        self
    }
}

/// The edge chosen for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    /// Edge host without port, sent as the marker header
    pub host: String,
    /// Where the stream lives on the edge
    pub stream_url: BaseUrl,
    /// Session id the edge reported, when probing is enabled
    pub session_id: Option<u64>,
}

/// A session the adapter refuses to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Status to answer with
    pub status: StatusCode,
    /// Shown to the client
    pub reason: String,
}

impl Rejection {
    fn no_server(vhost: &str) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            reason: format!("no edge server available for vhost '{vhost}'"),
        }
    }
}

/// Request and response hooks of a streaming protocol.
pub trait SessionAdapter: Send + Sync {
    /// Decide whether and where to redirect the session making this request.
    fn on_request_observed(
        &self,
        ctx: &RequestContext,
    ) -> impl Future<Output = Result<Option<RedirectTarget>, Rejection>> + Send;

    /// Rewrite the response body for the target chosen earlier, if any.
    fn on_response_ready(
        &self,
        ctx: &RequestContext,
        target: Option<&RedirectTarget>,
        body: Bytes,
    ) -> Bytes;
}

/// Adapter for HLS and HDS sessions served over HTTP.
#[derive(Debug, Clone)]
pub struct HttpStreamingAdapter {
    pool: SharedServerPool,
    cache: SharedConfigCache,
    upstream: UpstreamClient,
}

impl HttpStreamingAdapter {
    /// Create an adapter selecting from `pool` with settings from `cache`.
    pub fn new(pool: SharedServerPool, cache: SharedConfigCache, upstream: UpstreamClient) -> Self {
        Self {
            pool,
            cache,
            upstream,
        }
    }
}

impl SessionAdapter for HttpStreamingAdapter {
    async fn on_request_observed(
        &self,
        ctx: &RequestContext,
    ) -> Result<Option<RedirectTarget>, Rejection> {
        if ManifestFormat::detect(&ctx.path).is_none() {
            debug!(path = %ctx.path, "not a session start, forwarding as is");
            return Ok(None);
        }

        let props = self.cache.properties_or_default(&ctx.vhost, &ctx.application);
        let opted_in = ctx.query.as_deref().is_some_and(is_redirect_request);
        if !props.redirect_on_connect && !opted_in {
            debug!(vhost = %ctx.vhost, application = %ctx.application, "session not load balanced");
            return Ok(None);
        }

        let address = match self.pool.select_server(&ctx.vhost) {
            RedirectDecision::Redirect(address) => address,
            RedirectDecision::NoEligibleServer => {
                warn!(vhost = %ctx.vhost, url = %ctx.original_url, "rejecting session, no edge server available");
                return Err(Rejection::no_server(&ctx.vhost));
            }
        };

        let stream_url = BaseUrl::builder(address.as_str())
            .port(props.redirect_port.or(ctx.port))
            .path(ctx.path.as_str())
            .rename_app(&ctx.application, props.redirect_app_name.as_deref())
            .build();

        let session_id = if props.rewrite_session_id {
            probe_session_id(&self.upstream, &stream_url, ctx.query.as_deref().unwrap_or_default())
                .await
        } else {
            None
        };

        info!(
            vhost = %ctx.vhost,
            url = %ctx.original_url,
            edge = %address,
            stream_url = %stream_url,
            "session redirected"
        );
        Ok(Some(RedirectTarget {
            host: strip_port(&address).to_string(),
            stream_url,
            session_id,
        }))
    }

    fn on_response_ready(
        &self,
        ctx: &RequestContext,
        target: Option<&RedirectTarget>,
        body: Bytes,
    ) -> Bytes {
        let marker = target.map(|target| target.host.as_str());
        match (target, should_rewrite(&ctx.path, marker)) {
            (Some(target), Some(format)) => {
                let base = target.stream_url.manifest_directory(format);
                rewrite_manifest(format, body, &base.to_string()).body
            }
            _ => body,
        }
    }
}
