use std::borrow::Cow;

/// URL prefix of the primary (TLS) firmware mirror.
pub const SECURE_MIRROR_PREFIX: &str = "https://secure-appldnld";

/// URL prefix of the fallback mirror serving the same paths over plain HTTP.
pub const NON_SECURE_MIRROR_PREFIX: &str = "http://appldnld";

/// Derive the non-secure mirror URL for a firmware URL by swapping the
/// secure mirror prefix for the non-secure one. URLs that do not start with
/// the secure prefix are returned unchanged; callers must not assume the
/// output differs from the input.
pub fn to_non_secure_mirror(url: &str) -> Cow<'_, str> {
    match url.strip_prefix(SECURE_MIRROR_PREFIX) {
        Some(rest) => Cow::Owned(format!("{NON_SECURE_MIRROR_PREFIX}{rest}")),
        None => Cow::Borrowed(url),
    }
}

/// Get the final path segment of a URL with any query string or fragment
/// stripped. Returns None if the segment is empty (eg. the URL ends with a
/// slash).
pub fn file_name_for_url(url: &str) -> Option<&str> {
    let end = url.find(|c| c == '?' || c == '#').unwrap_or(url.len());
    let name = url[..end].rsplit('/').next().unwrap_or("");

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_non_secure_mirror() {
        assert_eq!(
            to_non_secure_mirror("https://secure-appldnld.apple.com/x/y/z.ipsw"),
            "http://appldnld.apple.com/x/y/z.ipsw",
        );
        assert_eq!(
            to_non_secure_mirror("https://secure-appldnld.example.com/a/b/c.ipsw"),
            "http://appldnld.example.com/a/b/c.ipsw",
        );

        // Non-matching URLs pass through untouched
        assert_eq!(
            to_non_secure_mirror("https://updates.example.com/x/y/z.ipsw"),
            "https://updates.example.com/x/y/z.ipsw",
        );
        assert_eq!(to_non_secure_mirror(""), "");

        // The prefix match is exact; no scheme normalization
        assert_eq!(
            to_non_secure_mirror("HTTPS://SECURE-APPLDNLD.apple.com/z.ipsw"),
            "HTTPS://SECURE-APPLDNLD.apple.com/z.ipsw",
        );
    }

    #[test]
    fn test_to_non_secure_mirror_idempotent() {
        let urls = [
            "https://secure-appldnld.apple.com/x/y/z.ipsw",
            "http://appldnld.apple.com/x/y/z.ipsw",
            "https://updates.example.com/x/y/z.ipsw",
        ];

        for url in &urls {
            let once = to_non_secure_mirror(url).into_owned();
            let twice = to_non_secure_mirror(&once).into_owned();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_file_name_for_url() {
        assert_eq!(
            file_name_for_url("https://secure-appldnld.apple.com/x/y/z.ipsw"),
            Some("z.ipsw"),
        );
        assert_eq!(
            file_name_for_url("http://appldnld.apple.com/z.ipsw?token=abc#frag"),
            Some("z.ipsw"),
        );
        assert_eq!(file_name_for_url("https://example.com/x/"), None);
        assert_eq!(file_name_for_url("https://example.com/x/?q"), None);
    }
}
