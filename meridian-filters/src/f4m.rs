//! Attribute-oriented HDS manifest grammar.
//!
//! `url` attributes of `<media>` and `<bootstrapInfo>` elements get the base URL
//! spliced in front of their value. Values that already carry a scheme are left alone.

use regex::Captures;
use tracing::trace;

use crate::patterns::{patterns, split_lines};
use crate::RewriteError;

/// Rewrite an f4m manifest body. Returns the new text and whether any line changed.
pub fn rewrite(text: &str, base_url: &str) -> Result<(String, bool), RewriteError> {
    let p = patterns()?;
    let mut out = String::with_capacity(text.len() + base_url.len() * 4);
    let mut rewritten = false;

    for line in split_lines(p, text) {
        let mut changed = false;
        let next = p.f4m_url_attribute.replace_all(line, |caps: &Captures<'_>| {
            let value = &caps[2];
            if p.absolute_url.is_match(value) {
                caps[0].to_string()
            } else {
                changed = true;
                format!("{}{}/{}", &caps[1], base_url, value)
            }
        });
        out.push_str(&next);
        out.push('\n');
        rewritten |= changed;
    }

    trace!(rewritten, "f4m pass complete");
    Ok((out, rewritten))
}
