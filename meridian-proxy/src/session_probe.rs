//! Ask the chosen edge for the session id it will use for this client.

use hyper::{StatusCode, Uri};
use meridian_filters::{extract_session_id, BaseUrl};
use tracing::{debug, error, info, warn};

use crate::connection_pool::UpstreamClient;

/// Fetch `<base><query>` from the edge and read the session id out of its manifest.
///
/// Every failure yields `None`. A 404 is expected for streams the edge does not
/// carry yet and is only logged at debug level.
pub async fn probe_session_id(client: &UpstreamClient, base: &BaseUrl, query: &str) -> Option<u64> {
    if base.is_secure() {
        warn!(base = %base, "session id probe skipped for https edge");
        return None;
    }

    let url = base.with_query(query);
    let uri: Uri = match url.parse() {
        Ok(uri) => uri,
        Err(err) => {
            error!(url, error = %err, "session id probe URL is invalid");
            return None;
        }
    };

    let response = match client.get(&uri).await {
        Ok(response) => response,
        Err(err) => {
            error!(url, error = %err, "session id probe failed");
            return None;
        }
    };

    if response.status == StatusCode::NOT_FOUND {
        debug!(url, "edge has no such stream yet");
        return None;
    }
    if !response.status.is_success() {
        error!(url, status = %response.status, "session id probe rejected");
        return None;
    }

    let session_id = extract_session_id(&String::from_utf8_lossy(&response.body));
    match session_id {
        Some(id) => info!(url, session_id = id, "edge session id obtained"),
        None => debug!(url, "edge manifest carried no session id"),
    }
    session_id
}
