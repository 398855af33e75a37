/// Checks if a host matches an allowed-host pattern
///
/// `cdn.example.com` matches only itself. `*.example.com` matches the bare
/// `example.com` and any subdomain of it. Comparison is case-insensitive.
///
/// # Examples
///
/// ```
/// use imgedge::url::matches_wildcard;
///
/// assert!(matches_wildcard("*.example.com", "images.example.com"));
/// assert!(matches_wildcard("*.example.com", "example.com"));
/// assert!(!matches_wildcard("*.example.com", "badexample.com"));
/// ```
pub fn matches_wildcard(pattern: &str, host: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let host = host.to_ascii_lowercase();

    match pattern.strip_prefix("*.") {
        Some(base) => {
            host == base
                || host
                    .strip_suffix(base)
                    .map_or(false, |rest| rest.ends_with('.'))
        }
        None => host == pattern,
    }
}
