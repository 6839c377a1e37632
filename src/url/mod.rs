//! URL handling module for Sumi-Sieve
//!
//! Locator normalization (so equivalent links map to one task) and the
//! allow/deny scope rules applied to discovered links.

mod normalize;
mod scope;

pub use normalize::normalize_url;
pub use scope::{extract_domain, matches_wildcard, Scope, ScopeRules};
