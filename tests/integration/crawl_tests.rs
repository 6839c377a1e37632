//! Integration tests for the crawler
//!
//! Most tests drive the full crawl cycle with a scripted renderer that serves
//! canned pages from memory; one runs the HTTP engine against a wiremock
//! server end-to-end.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use qrcode::{Color, QrCode};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sumi_sieve::browser::{RenderError, RenderSession, RenderedPage, Renderer};
use sumi_sieve::config::{parse_config, Config};
use sumi_sieve::crawler::Coordinator;
use sumi_sieve::extract::decode_payloads;
use sumi_sieve::normalize_url;
use sumi_sieve::state::FailureReason;
use sumi_sieve::storage::{Ledger, RunStatus, SqliteLedger};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ===== Scripted renderer =====

#[derive(Clone)]
enum Step {
    Page(String),
    Timeout,
    Missing,
}

/// Canned responses per locator; the last step repeats forever
#[derive(Default)]
struct Script {
    steps: Mutex<HashMap<String, VecDeque<Step>>>,
    loads: Mutex<HashMap<String, usize>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    launches: AtomicUsize,
    delay: Duration,
}

impl Script {
    fn next_step(&self, locator: &str) -> Option<Step> {
        *self
            .loads
            .lock()
            .unwrap()
            .entry(locator.to_string())
            .or_default() += 1;

        let mut steps = self.steps.lock().unwrap();
        let queue = steps.get_mut(locator)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn loads(&self, locator: &str) -> usize {
        let key = normalize_url(locator).unwrap().to_string();
        self.loads.lock().unwrap().get(&key).copied().unwrap_or(0)
    }
}

struct ScriptedRenderer {
    script: Arc<Script>,
}

impl ScriptedRenderer {
    fn new(delay: Duration) -> (Self, ScriptBuilder) {
        let script = Arc::new(Script {
            delay,
            ..Script::default()
        });
        (
            Self {
                script: Arc::clone(&script),
            },
            ScriptBuilder { script },
        )
    }
}

struct ScriptBuilder {
    script: Arc<Script>,
}

impl ScriptBuilder {
    fn on(&self, locator: &str, steps: Vec<Step>) -> &Self {
        let key = normalize_url(locator).unwrap().to_string();
        self.script
            .steps
            .lock()
            .unwrap()
            .insert(key, steps.into_iter().collect());
        self
    }

    fn page(&self, locator: &str, html: &str) -> &Self {
        self.on(locator, vec![Step::Page(html.to_string())])
    }
}

struct ScriptedSession {
    script: Arc<Script>,
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn launch(
        &self,
        _slot: u64,
        _user_agent: Option<String>,
    ) -> Result<Box<dyn RenderSession>, RenderError> {
        self.script.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            script: Arc::clone(&self.script),
        }))
    }
}

#[async_trait]
impl RenderSession for ScriptedSession {
    async fn render(&mut self, locator: &Url) -> Result<RenderedPage, RenderError> {
        let active = self.script.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.peak.fetch_max(active, Ordering::SeqCst);
        let step = self.script.next_step(locator.as_str());
        if !self.script.delay.is_zero() {
            tokio::time::sleep(self.script.delay).await;
        }
        self.script.active.fetch_sub(1, Ordering::SeqCst);

        match step {
            Some(Step::Page(html)) => Ok(RenderedPage {
                final_url: locator.clone(),
                html,
            }),
            Some(Step::Timeout) => Err(RenderError::Timeout),
            Some(Step::Missing) | None => Err(RenderError::Status(404)),
        }
    }

    async fn shutdown(self: Box<Self>) {}
}

// ===== Helpers =====

struct Knobs {
    engine: &'static str,
    workers: u32,
    pool_size: u32,
    max_depth: u32,
    max_attempts: u32,
}

impl Default for Knobs {
    fn default() -> Self {
        Self {
            engine: "chromium",
            workers: 2,
            pool_size: 2,
            max_depth: 2,
            max_attempts: 3,
        }
    }
}

/// Creates a test configuration writing everything under `dir`
fn create_test_config(dir: &Path, seeds: &[&str], knobs: Knobs) -> Config {
    let seeds = seeds
        .iter()
        .map(|s| format!("\"{}\"", s))
        .collect::<Vec<_>>()
        .join(", ");

    let toml = format!(
        r#"
seeds = [{seeds}]

[crawler]
workers = {workers}
max-depth = {max_depth}
task-timeout-ms = 5000
max-attempts = {max_attempts}

[backoff]
base-ms = 1
max-ms = 10
multiplier = 2.0
jitter = 0.0

[browser]
engine = "{engine}"
pool-size = {pool_size}
acquire-timeout-ms = 5000

[extraction]
block-markers = ["Verify you are human"]

[[extraction.fields]]
name = "title"
selector = "h1"

[output]
log-path = '{log}'
artifact-dir = '{artifacts}'
ledger-path = '{ledger}'
"#,
        seeds = seeds,
        workers = knobs.workers,
        max_depth = knobs.max_depth,
        max_attempts = knobs.max_attempts,
        engine = knobs.engine,
        pool_size = knobs.pool_size,
        log = dir.join("records.jsonl").display(),
        artifacts = dir.join("artifacts").display(),
        ledger = dir.join("ledger.db").display(),
    );

    parse_config(&toml).expect("test config should be valid")
}

fn read_records(dir: &Path) -> Vec<serde_json::Value> {
    match std::fs::read_to_string(dir.join("records.jsonl")) {
        Ok(content) => content
            .lines()
            .map(|line| serde_json::from_str(line).expect("record line should parse"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn html(title: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<a href="{}">link</a>"#, href))
        .collect();
    format!(
        "<html><body><h1>{}</h1>{}</body></html>",
        title, anchors
    )
}

/// Renders `payload` as a PNG QR code with a quiet zone
fn qr_png(payload: &str) -> Vec<u8> {
    let code = QrCode::new(payload.as_bytes()).unwrap();
    let modules = code.width() as u32;
    let colors = code.to_colors();
    let (scale, quiet) = (6, 4);
    let side = (modules + quiet * 2) * scale;

    let img = GrayImage::from_fn(side, side, |x, y| {
        let mx = (x / scale) as i64 - quiet as i64;
        let my = (y / scale) as i64 - quiet as i64;
        let dark = mx >= 0
            && my >= 0
            && (mx as u32) < modules
            && (my as u32) < modules
            && colors[(my as u32 * modules + mx as u32) as usize] == Color::Dark;
        Luma([if dark { 0u8 } else { 255u8 }])
    });

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

async fn run(config: Config, renderer: ScriptedRenderer) -> sumi_sieve::CrawlReport {
    Coordinator::with_renderer(config, "test-hash", false, Arc::new(renderer))
        .expect("coordinator should start")
        .run()
        .await
        .expect("crawl should finish")
}

// ===== Tests =====

#[tokio::test]
async fn test_crawl_follows_links_to_max_depth() {
    let dir = tempfile::tempdir().unwrap();
    let (renderer, script) = ScriptedRenderer::new(Duration::ZERO);
    script
        .page("https://a.test/", &html("A", &["/b", "/c"]))
        .page("https://a.test/b", &html("B", &["/d"]))
        .page("https://a.test/c", &html("C", &[]))
        .page("https://a.test/d", &html("D", &[]));
    let loads = Arc::clone(&renderer.script);

    let config = create_test_config(
        dir.path(),
        &["https://a.test/"],
        Knobs {
            max_depth: 1,
            ..Knobs::default()
        },
    );
    let report = run(config, renderer).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.snapshot.tasks_succeeded, 3);
    assert_eq!(loads.loads("https://a.test/"), 1);
    assert_eq!(loads.loads("https://a.test/b"), 1);
    assert_eq!(loads.loads("https://a.test/c"), 1);
    assert_eq!(loads.loads("https://a.test/d"), 0, "depth 2 is past the limit");

    let records = read_records(dir.path());
    assert_eq!(records.len(), 3);
    let b = records
        .iter()
        .find(|r| r["fields"]["title"] == "B")
        .expect("record for B");
    assert_eq!(b["depth"], 1);
    assert_eq!(b["via"], "https://a.test/");
}

#[tokio::test]
async fn test_transient_failures_retry_then_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let (renderer, script) = ScriptedRenderer::new(Duration::ZERO);
    script.on(
        "https://a.test/x",
        vec![
            Step::Timeout,
            Step::Timeout,
            Step::Page(html("X", &[])),
        ],
    );
    let loads = Arc::clone(&renderer.script);

    let config = create_test_config(dir.path(), &["https://a.test/x"], Knobs::default());
    let report = run(config, renderer).await;

    assert_eq!(loads.loads("https://a.test/x"), 3);
    assert_eq!(report.snapshot.retries_scheduled, 2);
    assert_eq!(report.snapshot.permanent_failures, 0);
    assert_eq!(report.snapshot.records_admitted, 1);
    assert_eq!(read_records(dir.path()).len(), 1);
}

#[tokio::test]
async fn test_timeouts_replace_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let (renderer, script) = ScriptedRenderer::new(Duration::ZERO);
    script.on(
        "https://a.test/x",
        vec![Step::Timeout, Step::Page(html("X", &[]))],
    );
    let launches = Arc::clone(&renderer.script);

    let config = create_test_config(
        dir.path(),
        &["https://a.test/x"],
        Knobs {
            workers: 1,
            pool_size: 1,
            ..Knobs::default()
        },
    );
    let report = run(config, renderer).await;

    assert_eq!(report.snapshot.records_admitted, 1);
    assert_eq!(launches.launches.load(Ordering::SeqCst), 2);
    assert_eq!(report.snapshot.sessions_replaced, 1);
}

#[tokio::test]
async fn test_identical_content_is_admitted_once() {
    let dir = tempfile::tempdir().unwrap();
    let (renderer, script) = ScriptedRenderer::new(Duration::ZERO);
    script
        .page("https://a.test/", &html("Same  listing", &["/mirror"]))
        .page("https://a.test/mirror", &html("Same listing", &[]));

    let config = create_test_config(dir.path(), &["https://a.test/"], Knobs::default());
    let report = run(config, renderer).await;

    assert_eq!(report.snapshot.tasks_succeeded, 2);
    assert_eq!(report.snapshot.records_admitted, 1);
    assert_eq!(report.snapshot.duplicates_discarded, 1);
    assert_eq!(read_records(dir.path()).len(), 1);
}

#[tokio::test]
async fn test_restart_admits_nothing_new() {
    let dir = tempfile::tempdir().unwrap();

    for round in 0..2 {
        let (renderer, script) = ScriptedRenderer::new(Duration::ZERO);
        script
            .page("https://a.test/", &html("A", &["/b"]))
            .page("https://a.test/b", &html("B", &[]));

        let config = create_test_config(dir.path(), &["https://a.test/"], Knobs::default());
        let report = run(config, renderer).await;

        if round == 0 {
            assert_eq!(report.snapshot.records_admitted, 2);
        } else {
            assert_eq!(report.snapshot.records_admitted, 0);
            assert_eq!(report.snapshot.duplicates_discarded, 2);
        }
    }

    assert_eq!(read_records(dir.path()).len(), 2);

    let ledger = SqliteLedger::new(&dir.path().join("ledger.db")).unwrap();
    let runs = ledger.list_runs(10).unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.status == RunStatus::Completed));
    assert_eq!(runs[0].totals.records_admitted, 0);
}

#[tokio::test]
async fn test_qr_payload_decoded_and_broken_image_kept_as_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let (renderer, script) = ScriptedRenderer::new(Duration::ZERO);
    let qr = BASE64.encode(qr_png("TICKET-4471"));
    let broken = BASE64.encode(b"these bytes are not an image");
    script.page(
        "https://a.test/",
        &format!(
            r#"<html><body><h1>Ticket</h1>
            <img src="data:image/png;base64,{}">
            <img src="data:image/png;base64,{}">
            </body></html>"#,
            qr, broken
        ),
    );

    let config = create_test_config(dir.path(), &["https://a.test/"], Knobs::default());
    let report = run(config, renderer).await;

    assert_eq!(report.snapshot.records_admitted, 1);
    assert_eq!(report.snapshot.artifacts_stored, 2);

    let records = read_records(dir.path());
    assert_eq!(records[0]["fields"]["title"], "Ticket");
    let payload = records[0]["fields"]["qr_payload"].as_str().unwrap();
    assert_eq!(decode_payloads(payload), Some(vec!["TICKET-4471".to_string()]));

    let artifacts = records[0]["artifacts"].as_array().unwrap();
    assert_eq!(artifacts.len(), 2);
    for name in artifacts {
        let name = name.as_str().unwrap();
        assert!(dir.path().join("artifacts").join(name).is_file());
    }
}

#[tokio::test]
async fn test_attempt_cap_records_permanent_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (renderer, script) = ScriptedRenderer::new(Duration::ZERO);
    script
        .page(
            "https://a.test/",
            &html("Index", &["/slow", "/gone"]),
        )
        .on("https://a.test/slow", vec![Step::Timeout])
        .on("https://a.test/gone", vec![Step::Missing]);
    let loads = Arc::clone(&renderer.script);

    let config = create_test_config(
        dir.path(),
        &["https://a.test/"],
        Knobs {
            max_attempts: 2,
            ..Knobs::default()
        },
    );
    let report = run(config, renderer).await;

    assert_eq!(loads.loads("https://a.test/slow"), 2);
    assert_eq!(loads.loads("https://a.test/gone"), 1, "404 is not retried");
    assert_eq!(report.snapshot.permanent_failures, 2);
    assert_eq!(report.status, RunStatus::Completed);

    let ledger = SqliteLedger::new(&dir.path().join("ledger.db")).unwrap();
    let failures = ledger.recent_failures(10).unwrap();
    assert_eq!(failures.len(), 2);

    let slow = failures
        .iter()
        .find(|f| f.locator == "https://a.test/slow")
        .unwrap();
    assert_eq!(slow.reason, FailureReason::Timeout);
    assert_eq!(slow.attempts, 2);

    let gone = failures
        .iter()
        .find(|f| f.locator == "https://a.test/gone")
        .unwrap();
    assert_eq!(gone.reason, FailureReason::NotFound);
    assert_eq!(gone.attempts, 1);
}

#[tokio::test]
async fn test_block_wall_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let (renderer, script) = ScriptedRenderer::new(Duration::ZERO);
    script.on(
        "https://a.test/",
        vec![
            Step::Page("<html><body>Please VERIFY YOU ARE HUMAN</body></html>".to_string()),
            Step::Page(html("Real", &[])),
        ],
    );

    let config = create_test_config(dir.path(), &["https://a.test/"], Knobs::default());
    let report = run(config, renderer).await;

    assert_eq!(report.snapshot.retries_scheduled, 1);
    let records = read_records(dir.path());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["fields"]["title"], "Real");
}

#[tokio::test]
async fn test_pool_bounds_concurrent_renders() {
    let dir = tempfile::tempdir().unwrap();
    let (renderer, script) = ScriptedRenderer::new(Duration::from_millis(30));
    let pages: Vec<String> = (0..10).map(|i| format!("/p{}", i)).collect();
    let links: Vec<&str> = pages.iter().map(String::as_str).collect();
    script.page("https://a.test/", &html("Index", &links));
    for (i, page) in pages.iter().enumerate() {
        script.page(
            &format!("https://a.test{}", page),
            &html(&format!("Page {}", i), &[]),
        );
    }
    let observed = Arc::clone(&renderer.script);

    let config = create_test_config(
        dir.path(),
        &["https://a.test/"],
        Knobs {
            workers: 6,
            pool_size: 2,
            ..Knobs::default()
        },
    );
    let report = run(config, renderer).await;

    assert_eq!(report.snapshot.records_admitted, 11);
    assert!(observed.peak.load(Ordering::SeqCst) <= 2);
    assert!(observed.launches.load(Ordering::SeqCst) <= 2);
    assert_eq!(report.snapshot.sessions_in_use, 0);
}

#[tokio::test]
async fn test_interrupted_run_resumes_from_frontier() {
    let dir = tempfile::tempdir().unwrap();

    let (renderer, script) = ScriptedRenderer::new(Duration::ZERO);
    script.page("https://a.test/", &html("A", &[]));
    let config = create_test_config(dir.path(), &["https://a.test/"], Knobs::default());
    let coordinator =
        Coordinator::with_renderer(config, "test-hash", false, Arc::new(renderer)).unwrap();
    coordinator.cancellation_token().cancel();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.status, RunStatus::Interrupted);
    assert_eq!(report.frontier_saved, 1);
    assert!(read_records(dir.path()).is_empty());

    let ledger = SqliteLedger::new(&dir.path().join("ledger.db")).unwrap();
    assert_eq!(ledger.load_frontier().unwrap().len(), 1);
    drop(ledger);

    let (renderer, script) = ScriptedRenderer::new(Duration::ZERO);
    script.page("https://a.test/", &html("A", &[]));
    let config = create_test_config(dir.path(), &["https://a.test/"], Knobs::default());
    let report = run(config, renderer).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.snapshot.records_admitted, 1);

    let ledger = SqliteLedger::new(&dir.path().join("ledger.db")).unwrap();
    assert!(ledger.load_frontier().unwrap().is_empty());
}

#[tokio::test]
async fn test_http_engine_end_to_end() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html("Home", &["/page1", "/missing"]))
                .insert_header("content-type", "text/html"),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html("Page 1", &[]))
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let seed = format!("{}/", base_url);
    let config = create_test_config(
        dir.path(),
        &[&seed],
        Knobs {
            engine: "http",
            ..Knobs::default()
        },
    );

    let report = Coordinator::new(config, "test-hash", false)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.snapshot.tasks_succeeded, 2);
    assert_eq!(report.snapshot.records_admitted, 2);
    assert_eq!(report.snapshot.permanent_failures, 1);

    let titles: Vec<String> = read_records(dir.path())
        .iter()
        .map(|r| r["fields"]["title"].as_str().unwrap().to_string())
        .collect();
    assert!(titles.contains(&"Home".to_string()));
    assert!(titles.contains(&"Page 1".to_string()));
}

#[tokio::test]
async fn test_unwritable_output_fails_run_and_keeps_task() {
    let dir = tempfile::tempdir().unwrap();
    let (renderer, script) = ScriptedRenderer::new(Duration::ZERO);
    script.page(
        "https://a.test/",
        &format!(
            r#"<html><body><h1>Ticket</h1><img src="data:image/png;base64,{}"></body></html>"#,
            BASE64.encode(b"image bytes")
        ),
    );

    let config = create_test_config(dir.path(), &["https://a.test/"], Knobs::default());
    let coordinator =
        Coordinator::with_renderer(config, "test-hash", false, Arc::new(renderer)).unwrap();
    let health = coordinator.health();
    std::fs::remove_dir_all(dir.path().join("artifacts")).unwrap();

    assert!(coordinator.run().await.is_err());
    assert!(health.snapshot().fatal_error.is_some());
    assert_eq!(health.snapshot().records_admitted, 0);
    assert!(read_records(dir.path()).is_empty());

    let ledger = SqliteLedger::new(&dir.path().join("ledger.db")).unwrap();
    let runs = ledger.list_runs(1).unwrap();
    assert_eq!(runs[0].status, RunStatus::Failed);
    let frontier = ledger.load_frontier().unwrap();
    assert_eq!(frontier.len(), 1);
    assert_eq!(frontier[0].locator, "https://a.test/");
}
