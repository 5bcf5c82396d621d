//! Parsing of PEP 503 "simple" HTML project pages.
//!
//! The page body is a flat list of anchors; a full HTML parser buys
//! nothing here, so the links are collected with a regex scan over the
//! anchor tags, the way the original tooling collects `href` attributes.

use once_cell::sync::Lazy;
use regex::Regex;

use skua_pypi_types::{File, Hashes, Yanked};

static ANCHOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<a\s([^>]*)>\s*([^<]*?)\s*</a>").unwrap());
static HREF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)href\s*=\s*"([^"]+)""#).unwrap());
static REQUIRES_PYTHON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)data-requires-python\s*=\s*"([^"]*)""#).unwrap());
static YANKED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)data-yanked(?:\s*=\s*"([^"]*)")?"#).unwrap());

/// Decode the handful of HTML entities indexes actually emit in attribute
/// values (`&gt;=3.7` and friends).
fn unescape(value: &str) -> String {
    value
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Collect the file links of a PEP 503 project page.
///
/// URLs are returned as found (possibly relative); the caller resolves
/// them against the page URL. The `requires-python` value is kept verbatim
/// for lenient parsing downstream.
pub(crate) fn parse_project_page(text: &str) -> Vec<File> {
    let mut files = Vec::new();
    for anchor in ANCHOR_RE.captures_iter(text) {
        let attributes = &anchor[1];
        let Some(href) = HREF_RE.captures(attributes) else {
            continue;
        };
        let url = unescape(&href[1]);

        // The anchor text is the filename; fall back to the URL's last
        // path segment (before any fragment).
        let text = anchor[2].trim();
        let filename = if text.is_empty() {
            let without_fragment = url.split('#').next().unwrap_or(&url);
            without_fragment
                .rsplit('/')
                .next()
                .unwrap_or(without_fragment)
                .to_string()
        } else {
            text.to_string()
        };

        let sha256 = url
            .split_once("#sha256=")
            .map(|(_, digest)| digest.to_string());
        let requires_python = REQUIRES_PYTHON_RE
            .captures(attributes)
            .map(|captures| unescape(&captures[1]));
        let yanked = YANKED_RE.captures(attributes).map(|captures| {
            match captures.get(1).map(|reason| unescape(reason.as_str())) {
                Some(reason) if !reason.is_empty() => Yanked::Reason(reason),
                _ => Yanked::Bool(true),
            }
        });

        files.push(File {
            filename,
            hashes: Hashes { sha256 },
            requires_python: requires_python.and_then(|value| {
                skua_pypi_types::LenientVersionSpecifiers::from_str_lenient(&value)
                    .ok()
                    .map(Into::into)
            }),
            size: None,
            url,
            yanked,
        });
    }
    files
}

#[cfg(test)]
mod tests {
    use super::parse_project_page;

    const PAGE: &str = r#"
    <!DOCTYPE html>
    <html>
      <body>
        <h1>Links for flask</h1>
        <a href="https://files.example.org/flask-2.1.2-py3-none-any.whl#sha256=abc123"
           data-requires-python="&gt;=3.7">flask-2.1.2-py3-none-any.whl</a><br/>
        <a href="../../packages/flask-2.1.2.tar.gz" data-requires-python="&gt;=3.7">
            flask-2.1.2.tar.gz
        </a><br/>
        <a href="https://files.example.org/flask-0.1.tar.gz" data-yanked="ancient">flask-0.1.tar.gz</a>
      </body>
    </html>
    "#;

    #[test]
    fn collects_links() {
        let files = parse_project_page(PAGE);
        assert_eq!(files.len(), 3);

        assert_eq!(files[0].filename, "flask-2.1.2-py3-none-any.whl");
        assert_eq!(files[0].hashes.sha256.as_deref(), Some("abc123"));
        assert!(files[0].requires_python.is_some());

        assert_eq!(files[1].filename, "flask-2.1.2.tar.gz");
        assert_eq!(files[1].url, "../../packages/flask-2.1.2.tar.gz");

        assert!(files[2].yanked.as_ref().unwrap().is_yanked());
        assert_eq!(files[2].yanked.as_ref().unwrap().reason(), Some("ancient"));
    }

    #[test]
    fn empty_page() {
        assert!(parse_project_page("<html><body></body></html>").is_empty());
    }
}
