/// Failure classification for crawl tasks
///
/// Every failed attempt carries one of these reasons. The reason alone
/// decides whether the retry controller may reschedule the task and whether
/// the renderer session that served it can be reused.
use std::fmt;

/// Why a task attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    // ===== Retryable =====
    /// Page load exceeded the per-task timeout
    Timeout,

    /// Connection refused, reset, TLS failure and similar
    Network,

    /// Host name could not be resolved
    Dns,

    /// The renderer process died or stopped answering
    RendererCrashed,

    /// No session became free within the acquisition timeout
    PoolExhausted,

    /// The page showed a captcha or rate-limit wall
    Blocked,

    /// The rendered markup could not be turned into records
    Extraction,

    /// The server answered with a status that may clear up (429, 5xx)
    HttpStatus(u16),

    // ===== Permanent =====
    /// The locator cannot be loaded at all
    Malformed,

    /// The server said the page does not exist (404, 410)
    NotFound,

    /// The server answered with a status that will not change (403, 400, ...)
    Rejected(u16),

    /// The response was not a document that can be extracted
    ContentMismatch,
}

impl FailureReason {
    /// Returns true if another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout
            | Self::Network
            | Self::Dns
            | Self::RendererCrashed
            | Self::PoolExhausted
            | Self::Blocked
            | Self::Extraction
            | Self::HttpStatus(_) => true,
            Self::Malformed | Self::NotFound | Self::Rejected(_) | Self::ContentMismatch => false,
        }
    }

    /// Returns true if the session that produced this failure must not be reused
    ///
    /// A blocked session is replaced too, so the retry comes from a fresh
    /// profile with the next user agent.
    pub fn poisons_session(&self) -> bool {
        matches!(self, Self::RendererCrashed | Self::Timeout | Self::Blocked)
    }

    /// Converts to the string stored in the ledger
    pub fn to_db_string(&self) -> String {
        match self {
            Self::Timeout => "timeout".to_string(),
            Self::Network => "network".to_string(),
            Self::Dns => "dns".to_string(),
            Self::RendererCrashed => "renderer_crashed".to_string(),
            Self::PoolExhausted => "pool_exhausted".to_string(),
            Self::Blocked => "blocked".to_string(),
            Self::Extraction => "extraction".to_string(),
            Self::HttpStatus(code) => format!("http_{}", code),
            Self::Malformed => "malformed".to_string(),
            Self::NotFound => "not_found".to_string(),
            Self::Rejected(code) => format!("rejected_{}", code),
            Self::ContentMismatch => "content_mismatch".to_string(),
        }
    }

    /// Parses the string stored in the ledger
    pub fn from_db_string(s: &str) -> Option<Self> {
        if let Some(code) = s.strip_prefix("http_") {
            return code.parse().ok().map(Self::HttpStatus);
        }
        if let Some(code) = s.strip_prefix("rejected_") {
            return code.parse().ok().map(Self::Rejected);
        }

        match s {
            "timeout" => Some(Self::Timeout),
            "network" => Some(Self::Network),
            "dns" => Some(Self::Dns),
            "renderer_crashed" => Some(Self::RendererCrashed),
            "pool_exhausted" => Some(Self::PoolExhausted),
            "blocked" => Some(Self::Blocked),
            "extraction" => Some(Self::Extraction),
            "malformed" => Some(Self::Malformed),
            "not_found" => Some(Self::NotFound),
            "content_mismatch" => Some(Self::ContentMismatch),
            _ => None,
        }
    }

    /// Classifies an HTTP status code that is not a success
    pub fn from_status(code: u16) -> Self {
        match code {
            404 | 410 => Self::NotFound,
            408 | 425 | 429 | 500..=599 => Self::HttpStatus(code),
            _ => Self::Rejected(code),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// A failed attempt, as handed to the retry controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub reason: FailureReason,
    pub detail: String,
}

impl FetchFailure {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    pub fn retryable(&self) -> bool {
        self.reason.is_retryable()
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "{}: {}", self.reason, self.detail)
        }
    }
}
