//! When a response is eligible for rewriting.

use tracing::{debug, error};

use crate::patterns::patterns;
use crate::ManifestFormat;

/// Header carrying the chosen edge host from request to response.
pub const MARKER_HEADER: &str = "X-LoadBalancer-Target";
/// Header carrying the session id obtained from the edge.
pub const SESSION_ID_HEADER: &str = "X-LoadBalancer-SessionId";
/// Header carrying the original request URL.
pub const ORIGIN_HEADER: &str = "X-LoadBalancer-Orig";

impl ManifestFormat {
    /// Detect the manifest format a request path asks for, if any.
    ///
    /// Playlists are any `*.m3u` or `*.m3u8` file; HDS manifests must be named
    /// `manifest.f4m`. Both may carry a query string. Case is ignored.
    pub fn detect(path: &str) -> Option<Self> {
        let p = match patterns() {
            Ok(p) => p,
            Err(err) => {
                error!(error = %err, "manifest path patterns unavailable");
                return None;
            }
        };
        if p.playlist_path.is_match(path) {
            Some(Self::Playlist)
        } else if p.manifest_path.is_match(path) {
            Some(Self::Manifest)
        } else {
            None
        }
    }
}

/// The format to rewrite a response as, or `None` when it must pass through.
///
/// Both conditions must hold: the path names a manifest, and the marker was set
/// to a non-empty value when the request was observed.
pub fn should_rewrite(path: &str, marker: Option<&str>) -> Option<ManifestFormat> {
    let Some(format) = ManifestFormat::detect(path) else {
        debug!(path, "not a manifest request");
        return None;
    };
    match marker.map(str::trim) {
        Some(marker) if !marker.is_empty() => Some(format),
        _ => {
            debug!(path, "manifest request not flagged for load balancing");
            None
        }
    }
}

/// Whether a query string opts in with `redirect=true` or `redirect=1`.
pub fn is_redirect_request(query: &str) -> bool {
    match patterns() {
        Ok(p) => p.redirect_opt_in.is_match(query),
        Err(err) => {
            error!(error = %err, "redirect opt-in pattern unavailable");
            false
        }
    }
}
