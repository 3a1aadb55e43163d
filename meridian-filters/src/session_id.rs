//! Edge session ids found in manifests served by the edge itself.

use tracing::{debug, error, info};

use crate::patterns::{patterns, split_lines};

/// Find the session id the edge embedded in a manifest it served.
///
/// Recognises, line by line, an f4m `<media url="..._w<id>[_...].abst/">`
/// element, a legacy chunklist reference carrying `wowzasessionid=<id>`, and a
/// `chunklist_w<id>` reference. The first positive id wins.
pub fn extract_session_id(text: &str) -> Option<u64> {
    let p = match patterns() {
        Ok(p) => p,
        Err(err) => {
            error!(error = %err, "session id patterns unavailable");
            return None;
        }
    };

    for line in split_lines(p, text) {
        let found = if let Some(caps) = p.f4m_session.captures(line) {
            debug!(line, "f4m media element");
            caps.get(1)
        } else if p.legacy_chunklist.is_match(line) {
            debug!(line, "legacy chunklist reference");
            p.legacy_session.captures(line).and_then(|caps| caps.get(1))
        } else if let Some(caps) = p.chunklist_session.captures(line) {
            debug!(line, "chunklist reference");
            caps.get(1)
        } else {
            None
        };

        if let Some(id) = found
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .filter(|id| *id > 0)
        {
            info!(session_id = id, "found edge session id");
            return Some(id);
        }
    }
    None
}
