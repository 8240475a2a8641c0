//! Hostname helpers shared by auto-tracking and the rule matcher.

use url::Url;

/// Browser-internal pages are never tracked.
const UNTRACKED_SCHEMES: [&str; 5] = [
    "chrome://",
    "about:",
    "edge://",
    "chrome-extension://",
    "moz-extension://",
];

pub fn is_untracked_scheme(url: &str) -> bool {
    UNTRACKED_SCHEMES.iter().any(|scheme| url.starts_with(scheme))
}

/// Lowercased hostname of a URL with a leading `www.` removed. `None` when the URL can't be
/// parsed or has no host.
pub fn normalized_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").map(str::to_owned).unwrap_or(host);
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Approximates eTLD+1 by keeping the last two labels. Multi-label public suffixes such as
/// `co.uk` come out wrong (`bbc.co.uk` → `co.uk`); this is a known limitation.
pub fn etld_plus_one(host: &str) -> &str {
    let mut dots = host.rmatch_indices('.');
    match (dots.next(), dots.next()) {
        (Some(_), Some((index, _))) => &host[index + 1..],
        _ => host,
    }
}
