use anyhow::{anyhow, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

// Everything but the RFC 3986 unreserved set gets encoded. Notably this includes `+`, which the CDN
// would otherwise read as a space.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Joins URL parts into a single URL.
///
/// Leading slashes are removed from each part after the first, and each part is resolved as a
/// relative reference against the URL built so far, so `..` steps up a level and an absolute URL
/// replaces everything before it. Path segments taken from the later parts are percent-encoded. A
/// trailing slash on the result is removed.
///
/// No parts gives an empty string and a single part is returned as-is. If the first part is not an
/// absolute URL the parts are simply appended as path segments.
#[must_use]
pub fn join<S: AsRef<str>>(parts: &[S]) -> String {
    match parts {
        [] => String::new(),
        [only] => only.as_ref().to_string(),
        [base, rest @ ..] => {
            let base = with_trailing_slash(base.as_ref());
            match Url::parse(&base) {
                Ok(url) => resolve(url, rest),
                Err(_) => append(base, rest),
            }
        }
    }
}

fn resolve<S: AsRef<str>>(mut url: Url, rest: &[S]) -> String {
    for part in rest {
        let part = part.as_ref();
        let reference = match Url::parse(part) {
            Ok(absolute) if absolute.has_host() => with_trailing_slash(part),
            Ok(_) | Err(_) => {
                let encoded = encoded_segments(part);
                if encoded.is_empty() {
                    continue;
                }
                encoded
            }
        };
        // Every reference ends in a slash, so joining cannot drop the last segment of the base.
        if let Ok(next) = url.join(&reference) {
            url = next;
        }
    }

    let mut joined = url.to_string();
    if joined.ends_with('/') {
        joined.pop();
    }
    joined
}

fn append<S: AsRef<str>>(mut joined: String, rest: &[S]) -> String {
    for part in rest {
        joined.push_str(&encoded_segments(part.as_ref()));
    }
    while joined.ends_with('/') && !joined.ends_with("://") {
        joined.pop();
    }
    joined
}

// Each non-empty segment, percent-encoded and followed by a slash.
fn encoded_segments(part: &str) -> String {
    part.split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| format!("{}/", utf8_percent_encode(segment, SEGMENT)))
        .collect()
}

/// Like [`join`], but parses the result as a [`Url`].
///
/// # Errors
///
/// Returns an error if the joined string is not an absolute URL.
pub fn join_url<S: AsRef<str>>(parts: &[S]) -> Result<Url> {
    let joined = join(parts);
    Url::parse(&joined).map_err(|e| anyhow!("`{joined}` is not a valid URL: {e}"))
}

/// Strips the `https://github.com/` prefix from a repo URL, leaving `owner/name`.
#[must_use]
pub fn strip_github_prefix(url: &str) -> &str {
    url.strip_prefix("https://github.com/")
        .unwrap_or(url)
        .trim_end_matches('/')
}

fn with_trailing_slash(base: &str) -> String {
    let mut base = base.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::no_slashes("https://example.org/abc", &["https://example.org/", "abc"])]
    #[case::trailing_slash_on_base("https://example.org/abc", &["https://example.org", "abc"])]
    #[case::leading_slash_on_part("https://example.org/abc", &["https://example.org", "/abc"])]
    #[case::trailing_slash_on_part("https://example.org/abc", &["https://example.org", "abc/"])]
    #[case::both_slashes_on_part("https://example.org/abc", &["https://example.org", "/abc/"])]
    #[case::multiple_parts("https://example.org/abc/def", &["https://example.org", "abc", "def"])]
    #[case::nested_part("https://example.org/sm/v2.9.0/a.zip", &["https://example.org", "sm/v2.9.0/a.zip"])]
    #[case::base_with_path("https://example.org/s1/abc", &["https://example.org/s1", "abc"])]
    #[case::url_escape("https://example.org/abc%2Bdef", &["https://example.org", "abc+def"])]
    #[case::space_escape("https://example.org/a%20b", &["https://example.org", "a b"])]
    #[case::parent_segment("https://example.org/a/c", &["https://example.org/a/b", "../c"])]
    #[case::parent_past_root("https://example.org", &["https://example.org/a", "..", ".."])]
    #[case::current_segment("https://example.org/a/b", &["https://example.org/a", "./b"])]
    #[case::absolute_part("https://other.org/x", &["https://example.org/abc", "https://other.org/x"])]
    #[case::absolute_then_relative("https://other.org/x/y", &["https://example.org", "https://other.org/x", "y"])]
    fn join(#[case] expect: &str, #[case] parts: &[&str]) {
        assert_eq!(super::join(parts), expect);
    }

    #[test]
    fn join_edge_cases() {
        let empty: &[&str] = &[];
        assert_eq!(super::join(empty), "");
        assert_eq!(super::join(&["https://example.org/"]), "https://example.org/");
    }

    #[test]
    fn join_without_absolute_base_appends() {
        assert_eq!(super::join(&["cdn", "/sm/", "a b"]), "cdn/sm/a%20b");
    }

    #[test]
    fn join_url_rejects_relative_result() {
        assert!(join_url(&["not a url", "abc"]).is_err());
        assert!(join_url(&["https://example.org", "abc"]).is_ok());
    }

    #[rstest]
    #[case("https://github.com/LykosAI/StabilityMatrix", "LykosAI/StabilityMatrix")]
    #[case("https://github.com/LykosAI/StabilityMatrix/", "LykosAI/StabilityMatrix")]
    #[case("LykosAI/StabilityMatrix", "LykosAI/StabilityMatrix")]
    fn strip_github_prefix(#[case] url: &str, #[case] expect: &str) {
        assert_eq!(super::strip_github_prefix(url), expect);
    }
}
