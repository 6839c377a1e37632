use crate::config::ScopeConfig;
use url::Url;

/// Where a discovered locator falls relative to the configured scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Matches the allow list (or the allow list is empty)
    Allowed,
    /// Matches the deny list
    Denied,
    /// Matches neither list while an allow list is configured
    Foreign,
}

impl Scope {
    /// Returns true if a task may be created for the locator
    pub fn should_follow(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Compiled allow/deny domain lists
#[derive(Debug, Clone, Default)]
pub struct ScopeRules {
    allow: Vec<String>,
    deny: Vec<String>,
}

impl ScopeRules {
    pub fn from_config(config: &ScopeConfig) -> Self {
        let lower = |patterns: &[String]| patterns.iter().map(|p| p.to_lowercase()).collect();
        Self {
            allow: lower(&config.allow),
            deny: lower(&config.deny),
        }
    }

    /// Classifies a locator's host
    ///
    /// The deny list wins over the allow list. Locators without a host are
    /// never in scope.
    pub fn classify(&self, url: &Url) -> Scope {
        let Some(domain) = extract_domain(url) else {
            return Scope::Denied;
        };

        if self.deny.iter().any(|p| matches_wildcard(p, &domain)) {
            return Scope::Denied;
        }

        if self.allow.is_empty() || self.allow.iter().any(|p| matches_wildcard(p, &domain)) {
            Scope::Allowed
        } else {
            Scope::Foreign
        }
    }

    pub fn permits(&self, url: &Url) -> bool {
        self.classify(url).should_follow()
    }
}

/// Extracts the lowercase host from a URL
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Checks if a domain matches a pattern
///
/// `"example.com"` matches only itself; `"*.example.com"` matches the bare
/// domain and any subdomain at any depth.
///
/// ```
/// use sumi_sieve::url::matches_wildcard;
///
/// assert!(matches_wildcard("*.example.com", "example.com"));
/// assert!(matches_wildcard("*.example.com", "img.cdn.example.com"));
/// assert!(!matches_wildcard("*.example.com", "notexample.com"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            candidate == base
                || candidate
                    .strip_suffix(base)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        }
        None => candidate == pattern,
    }
}
