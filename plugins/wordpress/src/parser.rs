//! Plugin header parsing, following WordPress's `get_file_data()`.
//!
//! WordPress only reads the first 8 KiB of a file and accepts a header on
//! any line, optionally prefixed by comment characters.

use regex::Regex;
use std::sync::OnceLock;

/// Bytes of a file inspected for headers.
pub const HEADER_READ_LIMIT: usize = 8 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginHeaders {
    pub name: String,
    pub version: String,
    pub plugin_uri: Option<String>,
    pub author: Option<String>,
    pub text_domain: Option<String>,
}

fn header_pattern(header: &str) -> Regex {
    let pattern = format!(r"(?mi)^[ \t/*#@]*{}:(.*)$", regex::escape(header));
    Regex::new(&pattern).expect("valid header pattern")
}

fn patterns() -> &'static [(&'static str, Regex); 5] {
    static PATTERNS: OnceLock<[(&'static str, Regex); 5]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            ("Plugin Name", header_pattern("Plugin Name")),
            ("Version", header_pattern("Version")),
            ("Plugin URI", header_pattern("Plugin URI")),
            ("Author", header_pattern("Author")),
            ("Text Domain", header_pattern("Text Domain")),
        ]
    })
}

/// Strips a trailing `*/` and surrounding whitespace.
fn cleanup_header_comment(value: &str) -> String {
    let value = value.trim();
    value
        .strip_suffix("*/")
        .unwrap_or(value)
        .trim()
        .to_string()
}

fn find_header(content: &str, pattern: &Regex) -> Option<String> {
    pattern
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| cleanup_header_comment(m.as_str()))
        .filter(|v| !v.is_empty())
}

/// Cuts `bytes` to the header window without splitting a UTF-8 sequence.
pub fn header_window(bytes: &[u8]) -> String {
    let end = bytes.len().min(HEADER_READ_LIMIT);
    String::from_utf8_lossy(&bytes[..end]).replace('\r', "\n")
}

/// Headers of a plugin's main file, or `None` when it has no
/// `Plugin Name` header.
pub fn parse_plugin_headers(content: &str) -> Option<PluginHeaders> {
    let [name, version, uri, author, domain] = patterns();

    let name = find_header(content, &name.1)?;
    Some(PluginHeaders {
        name,
        version: find_header(content, &version.1).unwrap_or_default(),
        plugin_uri: find_header(content, &uri.1),
        author: find_header(content, &author.1),
        text_domain: find_header(content, &domain.1),
    })
}
