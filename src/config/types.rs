use serde::Deserialize;

/// Main configuration structure for Sumi-Sieve
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Locators the crawl starts from (depth 0)
    pub seeds: Vec<String>,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub scope: ScopeConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    pub output: OutputConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Number of concurrent fetch workers
    pub workers: u32,

    /// Maximum depth to crawl from seed locators
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Upper bound on one page load, including image capture (milliseconds)
    #[serde(rename = "task-timeout-ms")]
    pub task_timeout_ms: u64,

    /// Total attempts a task gets before it is marked permanently failed
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Priority given to seed tasks; discovered children get one less than their parent
    #[serde(rename = "seed-priority")]
    pub seed_priority: i32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_depth: 2,
            task_timeout_ms: 30_000,
            max_attempts: 3,
            seed_priority: 0,
        }
    }
}

/// Retry backoff configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry (milliseconds)
    #[serde(rename = "base-ms")]
    pub base_ms: u64,

    /// Upper bound on any single delay (milliseconds)
    #[serde(rename = "max-ms")]
    pub max_ms: u64,

    /// Growth factor between consecutive delays
    pub multiplier: f64,

    /// Random extra delay as a fraction of the computed delay
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_ms: 60_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Which renderer drives page loads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Headless Chromium over the DevTools protocol
    Chromium,
    /// Plain HTTP GET, no script execution
    Http,
}

/// Browser pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub engine: Engine,

    /// Number of renderer sessions in the pool
    #[serde(rename = "pool-size")]
    pub pool_size: u32,

    /// How long a worker waits for a free session (milliseconds)
    #[serde(rename = "acquire-timeout-ms")]
    pub acquire_timeout_ms: u64,

    pub headless: bool,

    /// Path to the browser binary; autodetected when unset
    pub executable: Option<String>,

    /// Extra command-line arguments passed to every browser process
    pub args: Vec<String>,

    /// User agents assigned to sessions in round-robin order
    #[serde(rename = "user-agents")]
    pub user_agents: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            engine: Engine::Chromium,
            pool_size: 2,
            acquire_timeout_ms: 30_000,
            headless: true,
            executable: None,
            args: Vec::new(),
            user_agents: Vec::new(),
        }
    }
}

/// Which domains discovered links may lead to
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    /// Domain patterns to follow (e.g. "example.com" or "*.example.com"); empty means any
    pub allow: Vec<String>,

    /// Domain patterns never followed; checked before `allow`
    pub deny: Vec<String>,
}

/// Extraction rules
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Selector for repeated record containers; the whole page is one record when unset
    #[serde(rename = "record-selector")]
    pub record_selector: Option<String>,

    #[serde(rename = "link-selector")]
    pub link_selector: String,

    #[serde(rename = "image-selector")]
    pub image_selector: String,

    /// Case-insensitive phrases that mark a captcha or rate-limit wall
    #[serde(rename = "block-markers")]
    pub block_markers: Vec<String>,

    /// Maximum images captured per page
    #[serde(rename = "max-images")]
    pub max_images: usize,

    /// Images larger than this are not captured (bytes)
    #[serde(rename = "max-image-bytes")]
    pub max_image_bytes: usize,

    /// Whether captured images are written to the artifact directory
    #[serde(rename = "store-images")]
    pub store_images: bool,

    pub fields: Vec<FieldRule>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            record_selector: None,
            link_selector: "a[href]".to_string(),
            image_selector: "img[src]".to_string(),
            block_markers: Vec::new(),
            max_images: 16,
            max_image_bytes: 5 * 1024 * 1024,
            store_images: true,
            fields: Vec::new(),
        }
    }
}

/// One named field and where to find it
#[derive(Debug, Clone, Deserialize)]
pub struct FieldRule {
    pub name: String,
    pub selector: String,

    /// Attribute to read instead of the element's text
    #[serde(default)]
    pub attr: Option<String>,

    /// A page missing this field fails extraction
    #[serde(default)]
    pub required: bool,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the append-only JSON-lines record log
    #[serde(rename = "log-path")]
    pub log_path: String,

    /// Directory for content-addressed image artifacts
    #[serde(rename = "artifact-dir")]
    pub artifact_dir: String,

    /// Path to the SQLite run ledger
    #[serde(rename = "ledger-path")]
    pub ledger_path: String,

    /// Where the periodic status snapshot is written, if anywhere
    #[serde(rename = "status-path", default)]
    pub status_path: Option<String>,

    #[serde(rename = "status-interval-ms", default = "default_status_interval")]
    pub status_interval_ms: u64,
}

fn default_status_interval() -> u64 {
    5_000
}
