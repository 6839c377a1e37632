//! Extraction pipeline
//!
//! Turns rendered content into candidate records and child tasks:
//! 1. Parse the markup and read the configured fields, either once for the
//!    whole page or once per record container.
//! 2. Decode QR codes in the images captured for each record. The payloads
//!    become the `qr_payload` field as a JSON array of strings, sorted, with
//!    their bytes untouched; an undecodable image is skipped.
//! 3. Canonicalize the fields and fingerprint them.
//! 4. Resolve, normalize and scope-check links for the next depth level.

pub mod canonical;
pub mod parser;
pub mod qr;
pub mod record;
pub mod rules;

pub use canonical::{canonicalize, fingerprint, Fingerprint};
pub use qr::{CodeDecoder, DecodeSkip, QrDecoder};
pub use record::{ExtractedRecord, ImageArtifact};
pub use rules::{ExtractionRules, FieldSelector};

use crate::config::Config;
use crate::crawler::{CapturedImage, RenderedContent};
use crate::queue::{CrawlTask, TaskIds};
use crate::state::{FailureReason, FetchFailure};
use crate::url::{normalize_url, ScopeRules};
use crate::ConfigResult;
use chrono::Utc;
use scraper::{ElementRef, Html};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Field name that carries decoded QR payloads
pub const QR_PAYLOAD_FIELD: &str = "qr_payload";

/// Encodes decoded payloads as a JSON array string
///
/// Every payload keeps its own element, so one code reading `A B` never
/// matches two codes reading `A` and `B`, and line breaks survive.
pub fn encode_payloads(payloads: &BTreeSet<String>) -> String {
    serde_json::Value::from(payloads.iter().cloned().collect::<Vec<_>>()).to_string()
}

/// Reads back a `qr_payload` value written by [`encode_payloads`]
pub fn decode_payloads(value: &str) -> Option<Vec<String>> {
    serde_json::from_str(value).ok()
}

/// A page that could not be turned into records
///
/// Always retryable: a half-rendered page usually extracts fine next time.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Rendered page is empty")]
    EmptyDocument,

    #[error("Required field '{0}' not found on page")]
    MissingField(String),
}

impl From<ExtractionError> for FetchFailure {
    fn from(err: ExtractionError) -> Self {
        FetchFailure::new(FailureReason::Extraction, err.to_string())
    }
}

/// A record that has not been through deduplication yet
#[derive(Debug, Clone)]
pub struct CandidateRecord {
    pub record: ExtractedRecord,
    /// Artifacts to store if the record is admitted
    pub artifacts: Vec<ImageArtifact>,
}

/// Everything extracted from one page
#[derive(Debug, Default)]
pub struct Extraction {
    pub records: Vec<CandidateRecord>,
    pub children: Vec<CrawlTask>,
}

/// Stateless extraction over compiled rules
pub struct ExtractionPipeline {
    rules: ExtractionRules,
    scope: ScopeRules,
    decoder: Arc<dyn CodeDecoder>,
    max_depth: u32,
    store_images: bool,
}

impl ExtractionPipeline {
    pub fn new(
        rules: ExtractionRules,
        scope: ScopeRules,
        decoder: Arc<dyn CodeDecoder>,
        max_depth: u32,
        store_images: bool,
    ) -> Self {
        Self {
            rules,
            scope,
            decoder,
            max_depth,
            store_images,
        }
    }

    /// Builds the pipeline from configuration with the QR decoder
    pub fn from_config(config: &Config) -> ConfigResult<Self> {
        Ok(Self::new(
            ExtractionRules::compile(&config.extraction)?,
            ScopeRules::from_config(&config.scope),
            Arc::new(QrDecoder),
            config.crawler.max_depth,
            config.extraction.store_images,
        ))
    }

    pub fn rules(&self) -> &ExtractionRules {
        &self.rules
    }

    /// Extracts records and child tasks from one rendered page
    ///
    /// # Arguments
    ///
    /// * `task` - The task the content was rendered for
    /// * `content` - Markup and captured images
    /// * `ids` - Source of ids for child tasks
    /// * `via` - Locator of the page that linked to this one
    ///
    /// # Returns
    ///
    /// * `Ok(Extraction)` - Zero or more records and children
    /// * `Err(ExtractionError)` - The page as a whole could not be used
    pub fn extract(
        &self,
        task: &CrawlTask,
        content: &RenderedContent,
        ids: &TaskIds,
        via: Option<&Url>,
    ) -> Result<Extraction, ExtractionError> {
        if content.html.trim().is_empty() {
            return Err(ExtractionError::EmptyDocument);
        }

        let document = Html::parse_document(&content.html);
        let base = &content.final_url;

        let mut records = Vec::new();
        match &self.rules.record {
            Some(container) => {
                for (index, scope) in document.select(container).enumerate() {
                    match self.build_record(scope, task, content, via) {
                        Ok(Some(record)) => records.push(record),
                        Ok(None) => {}
                        Err(ExtractionError::MissingField(field)) => {
                            tracing::debug!(
                                "Skipping record {} on {}: required field '{}' missing",
                                index,
                                base,
                                field
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            None => {
                if let Some(record) =
                    self.build_record(document.root_element(), task, content, via)?
                {
                    records.push(record);
                }
            }
        }

        let children = self.discover_children(&document, task, base, ids);

        tracing::debug!(
            "Extracted {} records and {} links from {}",
            records.len(),
            children.len(),
            task.locator
        );

        Ok(Extraction { records, children })
    }

    /// Builds one record from `scope`; `None` when nothing was extracted
    fn build_record(
        &self,
        scope: ElementRef<'_>,
        task: &CrawlTask,
        content: &RenderedContent,
        via: Option<&Url>,
    ) -> Result<Option<CandidateRecord>, ExtractionError> {
        let base = &content.final_url;

        let mut fields = BTreeMap::new();
        for field in &self.rules.fields {
            match parser::read_field(scope, field, base) {
                Some(value) => {
                    fields.insert(field.name.clone(), value);
                }
                None if field.required => {
                    return Err(ExtractionError::MissingField(field.name.clone()));
                }
                None => {}
            }
        }

        let images = self.images_in(scope, content);

        let mut payloads = BTreeSet::new();
        for image in &images {
            match self.decoder.decode(&image.bytes) {
                Ok(found) => payloads.extend(found),
                Err(skip) => {
                    tracing::debug!("No payload from image {}: {}", image.source, skip);
                }
            }
        }
        if !payloads.is_empty() {
            fields.insert(QR_PAYLOAD_FIELD.to_string(), encode_payloads(&payloads));
        }

        let fields = canonicalize(&fields);
        if fields.is_empty() {
            return Ok(None);
        }

        let artifacts: Vec<ImageArtifact> = if self.store_images {
            let mut seen = HashSet::new();
            images
                .iter()
                .map(|image| ImageArtifact::from_bytes(image.bytes.clone()))
                .filter(|artifact| seen.insert(artifact.name.clone()))
                .collect()
        } else {
            Vec::new()
        };

        let record = ExtractedRecord {
            source: task.locator.to_string(),
            fingerprint: fingerprint(&fields),
            fields,
            artifacts: artifacts.iter().map(|a| a.name.clone()).collect(),
            discovered_at: Utc::now(),
            depth: task.depth,
            via: via.map(|url| url.to_string()),
        };

        Ok(Some(CandidateRecord { record, artifacts }))
    }

    /// Captured images whose source appears under `scope`
    fn images_in<'c>(
        &self,
        scope: ElementRef<'_>,
        content: &'c RenderedContent,
    ) -> Vec<&'c CapturedImage> {
        if content.images.is_empty() {
            return Vec::new();
        }
        parser::image_sources(
            scope,
            &self.rules.images,
            &content.final_url,
            self.rules.max_images,
        )
        .iter()
        .filter_map(|source| content.images.iter().find(|image| &image.source == source))
        .collect()
    }

    /// Child tasks for in-scope links, or none once the depth limit is reached
    fn discover_children(
        &self,
        document: &Html,
        task: &CrawlTask,
        base: &Url,
        ids: &TaskIds,
    ) -> Vec<CrawlTask> {
        if task.depth >= self.max_depth {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut children = Vec::new();
        for link in parser::collect_links(document, &self.rules.links, base) {
            let locator = match normalize_url(link.as_str()) {
                Ok(locator) => locator,
                Err(e) => {
                    tracing::trace!("Dropping link {}: {}", link, e);
                    continue;
                }
            };
            if locator == task.locator || !self.scope.permits(&locator) {
                continue;
            }
            if seen.insert(locator.as_str().to_string()) {
                children.push(task.child(ids.next(), locator));
            }
        }
        children
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtractionConfig, FieldRule, ScopeConfig};

    fn field(name: &str, selector: &str, required: bool) -> FieldRule {
        FieldRule {
            name: name.to_string(),
            selector: selector.to_string(),
            attr: None,
            required,
        }
    }

    fn pipeline(config: ExtractionConfig, max_depth: u32) -> ExtractionPipeline {
        ExtractionPipeline::new(
            ExtractionRules::compile(&config).unwrap(),
            ScopeRules::from_config(&ScopeConfig {
                allow: vec!["shop.test".to_string()],
                deny: Vec::new(),
            }),
            Arc::new(QrDecoder),
            max_depth,
            config.store_images,
        )
    }

    fn content(url: &str, html: &str, images: Vec<CapturedImage>) -> RenderedContent {
        let locator = Url::parse(url).unwrap();
        RenderedContent {
            locator: locator.clone(),
            final_url: locator,
            html: html.to_string(),
            images,
        }
    }

    fn seed(url: &str) -> CrawlTask {
        CrawlTask::seed(TaskIds::new().next(), Url::parse(url).unwrap(), 0)
    }

    #[test]
    fn test_whole_page_record() {
        let config = ExtractionConfig {
            fields: vec![field("title", "h1", true), field("price", ".price", false)],
            ..ExtractionConfig::default()
        };
        let page = content(
            "https://shop.test/w",
            "<h1> Blue   Widget </h1><span class='price'>9.99</span>",
            Vec::new(),
        );

        let out = pipeline(config, 1)
            .extract(&seed("https://shop.test/w"), &page, &TaskIds::new(), None)
            .unwrap();

        assert_eq!(out.records.len(), 1);
        let record = &out.records[0].record;
        assert_eq!(record.fields["title"], "Blue Widget");
        assert_eq!(record.fields["price"], "9.99");
        assert_eq!(record.source, "https://shop.test/w");
    }

    #[test]
    fn test_missing_required_field_fails_whole_page() {
        let config = ExtractionConfig {
            fields: vec![field("title", "h1", true)],
            ..ExtractionConfig::default()
        };
        let page = content("https://shop.test/", "<p>loading...</p>", Vec::new());

        let err = pipeline(config, 1)
            .extract(&seed("https://shop.test/"), &page, &TaskIds::new(), None)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::MissingField(_)));
        assert!(FetchFailure::from(err).retryable());
    }

    #[test]
    fn test_empty_page_is_error() {
        let page = content("https://shop.test/", "   ", Vec::new());
        let err = pipeline(ExtractionConfig::default(), 1)
            .extract(&seed("https://shop.test/"), &page, &TaskIds::new(), None)
            .unwrap_err();
        assert!(matches!(err, ExtractionError::EmptyDocument));
    }

    #[test]
    fn test_record_containers_skip_incomplete_items() {
        let config = ExtractionConfig {
            record_selector: Some("li.item".to_string()),
            fields: vec![field("name", ".name", true), field("sku", ".sku", false)],
            ..ExtractionConfig::default()
        };
        let html = r#"<ul>
            <li class="item"><span class="name">A</span><span class="sku">1</span></li>
            <li class="item"><span class="sku">2</span></li>
            <li class="item"><span class="name">C</span></li>
        </ul>"#;
        let page = content("https://shop.test/list", html, Vec::new());

        let out = pipeline(config, 1)
            .extract(&seed("https://shop.test/list"), &page, &TaskIds::new(), None)
            .unwrap();

        let names: Vec<_> = out
            .records
            .iter()
            .map(|c| c.record.fields["name"].clone())
            .collect();
        assert_eq!(names, vec!["A", "C"]);
    }

    #[test]
    fn test_children_respect_depth_and_scope() {
        let html = r##"<a href="/b">B</a><a href="/c#x">C</a><a href="/b">again</a>
            <a href="https://elsewhere.test/">out</a><a href="#top">self</a>"##;
        let page = content("https://shop.test/", html, Vec::new());
        let pipe = pipeline(ExtractionConfig::default(), 1);
        let ids = TaskIds::new();

        let root = seed("https://shop.test/");
        let out = pipe.extract(&root, &page, &ids, None).unwrap();
        let children: Vec<_> = out.children.iter().map(|t| t.locator.to_string()).collect();
        assert_eq!(
            children,
            vec!["https://shop.test/b", "https://shop.test/c"]
        );
        assert!(out.children.iter().all(|t| t.depth == 1 && t.parent == Some(root.id)));

        let deeper = out.children[0].clone();
        let out = pipe.extract(&deeper, &page, &ids, None).unwrap();
        assert!(out.children.is_empty());
    }

    #[test]
    fn test_qr_payload_and_undecodable_image() {
        let config = ExtractionConfig {
            fields: vec![field("title", "h1", false)],
            ..ExtractionConfig::default()
        };
        let html = r#"<h1>Ticket</h1><img src="/qr.png"><img src="/broken.png">"#;
        let images = vec![
            CapturedImage {
                source: "https://shop.test/qr.png".to_string(),
                bytes: qr::tests::qr_png("SEAT-12A"),
            },
            CapturedImage {
                source: "https://shop.test/broken.png".to_string(),
                bytes: b"not an image".to_vec(),
            },
        ];
        let page = content("https://shop.test/t", html, images);

        let out = pipeline(config, 0)
            .extract(&seed("https://shop.test/t"), &page, &TaskIds::new(), None)
            .unwrap();

        let candidate = &out.records[0];
        assert_eq!(candidate.record.fields["title"], "Ticket");
        assert_eq!(
            decode_payloads(&candidate.record.fields[QR_PAYLOAD_FIELD]),
            Some(vec!["SEAT-12A".to_string()])
        );
        assert_eq!(candidate.artifacts.len(), 2);
        assert_eq!(candidate.record.artifacts.len(), 2);
    }

    fn ticket_page(payloads: &[&str]) -> RenderedContent {
        let mut html = String::from("<h1>Ticket</h1>");
        let mut images = Vec::new();
        for (i, payload) in payloads.iter().enumerate() {
            html.push_str(&format!("<img src=\"/qr{}.png\">", i));
            images.push(CapturedImage {
                source: format!("https://shop.test/qr{}.png", i),
                bytes: qr::tests::qr_png(payload),
            });
        }
        content("https://shop.test/t", &html, images)
    }

    #[test]
    fn test_multiline_qr_payload_survives() {
        let vcard = "BEGIN:VCARD\nFN:Ada  Lovelace\nEND:VCARD";
        let out = pipeline(ExtractionConfig::default(), 0)
            .extract(
                &seed("https://shop.test/t"),
                &ticket_page(&[vcard]),
                &TaskIds::new(),
                None,
            )
            .unwrap();

        let value = &out.records[0].record.fields[QR_PAYLOAD_FIELD];
        assert_eq!(decode_payloads(value), Some(vec![vcard.to_string()]));
    }

    #[test]
    fn test_one_code_differs_from_two() {
        let pipe = pipeline(ExtractionConfig::default(), 0);
        let task = seed("https://shop.test/t");

        let one = pipe
            .extract(&task, &ticket_page(&["A B"]), &TaskIds::new(), None)
            .unwrap();
        let two = pipe
            .extract(&task, &ticket_page(&["A", "B"]), &TaskIds::new(), None)
            .unwrap();

        let one = &one.records[0].record;
        let two = &two.records[0].record;
        assert_eq!(decode_payloads(&two.fields[QR_PAYLOAD_FIELD]).unwrap(), vec!["A", "B"]);
        assert_ne!(one.fields[QR_PAYLOAD_FIELD], two.fields[QR_PAYLOAD_FIELD]);
        assert_ne!(one.fingerprint, two.fingerprint);
    }

    #[test]
    fn test_fingerprint_ignores_source() {
        let config = ExtractionConfig {
            fields: vec![field("title", "h1", true)],
            ..ExtractionConfig::default()
        };
        let pipe = pipeline(config, 0);
        let ids = TaskIds::new();

        let a = pipe
            .extract(
                &seed("https://shop.test/a"),
                &content("https://shop.test/a", "<h1>Same</h1>", Vec::new()),
                &ids,
                None,
            )
            .unwrap();
        let b = pipe
            .extract(
                &seed("https://shop.test/b"),
                &content("https://shop.test/b", "<h1> Same </h1>", Vec::new()),
                &ids,
                None,
            )
            .unwrap();

        assert_eq!(
            a.records[0].record.fingerprint,
            b.records[0].record.fingerprint
        );
    }

    #[test]
    fn test_page_without_fields_yields_no_record() {
        let page = content("https://shop.test/", "<p>nothing configured</p>", Vec::new());
        let out = pipeline(ExtractionConfig::default(), 0)
            .extract(&seed("https://shop.test/"), &page, &TaskIds::new(), None)
            .unwrap();
        assert!(out.records.is_empty());
    }
}
