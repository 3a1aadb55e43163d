//! Line-oriented HLS playlist grammar.
//!
//! Lines naming a chunklist (`chunklist.m3u8`, `chunklist-b800.m3u8`,
//! `chunklist_w1234.m3u8?...`) or a media segment (`media-u1_0.ts`,
//! `media_w1234_5.ts`) are made absolute under the base URL. Everything else,
//! including lines that are already absolute, is copied through.

use tracing::trace;

use crate::patterns::{patterns, split_lines};
use crate::RewriteError;

/// Rewrite a playlist body. Returns the new text and whether any line changed.
///
/// The output always ends every line with `\n`, whatever the input used.
pub fn rewrite(text: &str, base_url: &str) -> Result<(String, bool), RewriteError> {
    let p = patterns()?;
    let mut out = String::with_capacity(text.len() + base_url.len() * 4);
    let mut rewritten = false;

    for line in split_lines(p, text) {
        if let Some(caps) = p.chunklist_line.captures(line) {
            push_absolute(&mut out, base_url, "chunklist", &caps[1]);
            rewritten = true;
        } else if let Some(caps) = p.media_line.captures(line) {
            push_absolute(&mut out, base_url, "media", &caps[1]);
            rewritten = true;
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }

    trace!(rewritten, lines = out.lines().count(), "playlist pass complete");
    Ok((out, rewritten))
}

fn push_absolute(out: &mut String, base_url: &str, stem: &str, rest: &str) {
    out.push_str(base_url);
    out.push('/');
    out.push_str(stem);
    out.push_str(rest);
}
