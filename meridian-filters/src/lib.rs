//! Meridian manifest filters.
//!
//! Rewrites HLS playlists and HDS manifests so every relative asset reference
//! points at the edge server the client was sent to. A body that cannot be
//! rewritten is passed through untouched; callers never see an error.

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod base_url;
pub mod f4m;
mod patterns;
pub mod playlist;
pub mod session_id;
pub mod trigger;

pub use base_url::{strip_port, BaseUrl, BaseUrlBuilder};
pub use session_id::extract_session_id;
pub use trigger::{
    is_redirect_request, should_rewrite, MARKER_HEADER, ORIGIN_HEADER, SESSION_ID_HEADER,
};

/// Streaming manifest formats the filters understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestFormat {
    /// Line-based HLS playlist (`.m3u`, `.m3u8`)
    Playlist,
    /// XML HDS manifest (`manifest.f4m`)
    Manifest,
}

impl ManifestFormat {
    /// Short name for diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Playlist => "m3u8",
            Self::Manifest => "f4m",
        }
    }
}

/// Why a rewrite pass gave up.
#[derive(Error, Debug, Clone)]
pub enum RewriteError {
    /// The body is not UTF-8 text
    #[error("manifest body is not valid UTF-8: {0}")]
    Decode(#[from] std::str::Utf8Error),

    /// A built-in pattern failed to compile
    #[error("invalid manifest pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Result of a rewrite pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    /// Body to send to the client
    pub body: Bytes,
    /// Whether `body` differs from the input
    pub rewritten: bool,
}

impl RewriteOutcome {
    fn unchanged(body: Bytes) -> Self {
        Self {
            body,
            rewritten: false,
        }
    }
}

/// Make the relative references in a manifest absolute under `base_url`.
///
/// `base_url` is the directory the manifest lives in on the edge, without a
/// trailing slash. When nothing matched or the body could not be processed, the
/// original bytes come back with `rewritten == false`.
pub fn rewrite_manifest(format: ManifestFormat, body: Bytes, base_url: &str) -> RewriteOutcome {
    let result = std::str::from_utf8(&body)
        .map_err(RewriteError::from)
        .and_then(|text| match format {
            ManifestFormat::Playlist => playlist::rewrite(text, base_url),
            ManifestFormat::Manifest => f4m::rewrite(text, base_url),
        });

    match result {
        Ok((text, true)) => {
            info!(format = format.as_str(), base_url, "manifest rewritten with absolute URLs");
            RewriteOutcome {
                body: Bytes::from(text),
                rewritten: true,
            }
        }
        Ok((_, false)) => {
            debug!(format = format.as_str(), base_url, "manifest had nothing to rewrite");
            RewriteOutcome::unchanged(body)
        }
        Err(err) => {
            warn!(format = format.as_str(), error = %err, "manifest rewrite failed, passing body through");
            RewriteOutcome::unchanged(body)
        }
    }
}
