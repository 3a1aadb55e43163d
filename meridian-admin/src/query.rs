//! Diagnostic views over the server pool.

use meridian_core::{RedirectDecision, ServerDescriptor, ServerPool};
use serde::Serialize;
use tracing::debug;

use crate::AdminError;

/// JSON key holding the server list.
pub const SERVER_INFO_KEY: &str = "LoadBalancerServerInfo";

/// Which view a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoQuery {
    /// Pick a server: `redirect=<host>`
    Redirect,
    /// Every known server as JSON, served as `application/json`
    ServerInfoJson,
    /// The same JSON, served as `text/plain`
    ServerInfoText,
}

impl InfoQuery {
    /// Read the view from a raw query string.
    ///
    /// `serverInfoJSON` and `serverInfo` are only honoured when server info is
    /// enabled; everything else is a redirect query.
    pub fn parse(query: Option<&str>, enable_server_info: bool) -> Self {
        let Some(query) = query.filter(|_| enable_server_info) else {
            return Self::Redirect;
        };
        if query.contains("serverInfoJSON") {
            Self::ServerInfoJson
        } else if query.contains("serverInfo") {
            Self::ServerInfoText
        } else {
            Self::Redirect
        }
    }
}

/// A rendered view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminResponse {
    /// Value for the `Content-Type` header
    pub content_type: &'static str,
    /// Response body
    pub body: String,
}

#[derive(Serialize)]
struct ServerInfoDocument<'a> {
    #[serde(rename = "LoadBalancerServerInfo")]
    servers: &'a [ServerDescriptor],
    #[serde(rename = "redirectTotal")]
    redirect_total: u64,
    #[serde(rename = "totalConnections")]
    total_connections: i64,
}

/// Render a view for `vhost`.
///
/// The redirect view performs a real selection, so it counts against the chosen
/// server like any client redirect.
pub fn render(query: InfoQuery, pool: &ServerPool, vhost: &str) -> Result<AdminResponse, AdminError> {
    debug!(?query, vhost, "rendering admin view");
    match query {
        InfoQuery::Redirect => {
            let host = match pool.select_server(vhost) {
                RedirectDecision::Redirect(host) => host,
                RedirectDecision::NoEligibleServer => "unknown".to_string(),
            };
            Ok(AdminResponse {
                content_type: "text/plain",
                body: format!("redirect={host}"),
            })
        }
        InfoQuery::ServerInfoJson | InfoQuery::ServerInfoText => {
            let report = pool.report(vhost);
            let body = serde_json::to_string(&ServerInfoDocument {
                servers: &report.servers,
                redirect_total: report.redirect_total,
                total_connections: report.total_connections,
            })?;
            let content_type = if query == InfoQuery::ServerInfoJson {
                "application/json"
            } else {
                "text/plain"
            };
            Ok(AdminResponse { content_type, body })
        }
    }
}
