//! Compiled patterns shared by the filters.

use std::sync::LazyLock;

use regex::Regex;

use crate::RewriteError;

pub(crate) struct Patterns {
    pub(crate) line_break: Regex,
    pub(crate) chunklist_line: Regex,
    pub(crate) media_line: Regex,
    pub(crate) f4m_url_attribute: Regex,
    pub(crate) absolute_url: Regex,
    pub(crate) playlist_path: Regex,
    pub(crate) playlist_file: Regex,
    pub(crate) manifest_path: Regex,
    pub(crate) manifest_file: Regex,
    pub(crate) redirect_opt_in: Regex,
    pub(crate) f4m_session: Regex,
    pub(crate) legacy_chunklist: Regex,
    pub(crate) legacy_session: Regex,
    pub(crate) chunklist_session: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            line_break: Regex::new(r"\r\n|\n|\r")?,
            chunklist_line: Regex::new(r"^chunklist((?:-[^.]+|_w\d+[^.]*)?\.m3u8.*)$")?,
            media_line: Regex::new(r"^media((?:-[^.]+|_w\d+[^.]*)?\.ts.*)$")?,
            f4m_url_attribute: Regex::new(
                r#"(<(?:media|bootstrapInfo)(?:\s[^>]*?)?\surl=")([^"]*)"#,
            )?,
            absolute_url: Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://")?,
            playlist_path: Regex::new(r"(?i)^.*/[^/]*\.m3u8?(\?[^/]*)?$")?,
            playlist_file: Regex::new(r"(?i)/[^/]*\.m3u8?(\?[^/]*)?$")?,
            manifest_path: Regex::new(r"(?i)^.*/manifest\.f4m(\?[^/]*)?$")?,
            manifest_file: Regex::new(r"(?i)/manifest\.f4m(\?[^/]*)?$")?,
            redirect_opt_in: Regex::new(r"(?:^|[?&])redirect=(?:true|1)")?,
            f4m_session: Regex::new(r#"<media[^>]+ url="[^>]+_w([0-9]+)(?:_[^>]+)?\.abst/">"#)?,
            legacy_chunklist: Regex::new(r"^chunklist(?:-[^.]+)?\.m3u8")?,
            legacy_session: Regex::new(r"[?&]wowzasessionid=([0-9]+)")?,
            chunklist_session: Regex::new(r"^chunklist_w([0-9]+)")?,
        })
    }
}

static PATTERNS: LazyLock<Result<Patterns, regex::Error>> = LazyLock::new(Patterns::compile);

pub(crate) fn patterns() -> Result<&'static Patterns, RewriteError> {
    PATTERNS
        .as_ref()
        .map_err(|err| RewriteError::Pattern(err.clone()))
}

/// Split a text body into lines on any of `\r\n`, `\n` or `\r`.
///
/// Trailing empty lines are dropped, so a body ending in a line break yields no
/// empty last line.
pub(crate) fn split_lines<'a>(patterns: &Patterns, text: &'a str) -> Vec<&'a str> {
    let mut lines: Vec<&str> = patterns.line_break.split(text).collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}
