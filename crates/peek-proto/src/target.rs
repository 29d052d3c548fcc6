use url::Url;

/// Host of the planning-poker service whose channels get observed.
pub const DEFAULT_TARGET_HOST: &str = "action.parabol.co";

/// Decides which channel endpoints belong to the observed service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetMatcher {
    host: String,
}

impl Default for TargetMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_HOST)
    }
}

impl TargetMatcher {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// True when the endpoint host is the target host or one of its subdomains.
    /// Unparseable URLs never match.
    pub fn matches(&self, endpoint: &str) -> bool {
        let Ok(url) = Url::parse(endpoint) else {
            return false;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        host == self.host
            || host
                .strip_suffix(self.host.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    }
}

/// True for `http(s)://action.parabol.co/meet/<meeting>/estimate/<stage...>`.
pub fn is_estimate_session_url(candidate: &str) -> bool {
    let Ok(url) = Url::parse(candidate) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    if url.host_str() != Some(DEFAULT_TARGET_HOST) {
        return false;
    }
    let Some(segments) = url.path_segments() else {
        return false;
    };
    let segments: Vec<&str> = segments.collect();
    match segments.as_slice() {
        ["meet", meeting, "estimate", rest @ ..] => {
            !meeting.is_empty() && rest.iter().any(|segment| !segment.is_empty())
        }
        _ => false,
    }
}
