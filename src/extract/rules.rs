use crate::config::ExtractionConfig;
use crate::{ConfigError, ConfigResult};
use scraper::Selector;

/// A configured field with its selector compiled
#[derive(Debug, Clone)]
pub struct FieldSelector {
    pub name: String,
    pub selector: Selector,
    /// Attribute to read instead of the element text
    pub attr: Option<String>,
    pub required: bool,
}

/// Compiled extraction rules
///
/// Built once at startup; selectors that fail to compile were already
/// rejected by config validation, but compiling here reports them again
/// instead of panicking.
#[derive(Debug, Clone)]
pub struct ExtractionRules {
    /// Each match is one record; `None` means the whole page is one record
    pub record: Option<Selector>,
    pub links: Selector,
    pub images: Selector,
    pub fields: Vec<FieldSelector>,
    pub max_images: usize,
    pub block_markers: Vec<String>,
}

impl ExtractionRules {
    /// Compiles the selectors in `config`
    ///
    /// # Returns
    ///
    /// * `Ok(ExtractionRules)` - All selectors compiled
    /// * `Err(ConfigError::InvalidSelector)` - A selector did not parse
    pub fn compile(config: &ExtractionConfig) -> ConfigResult<Self> {
        let record = config.record_selector.as_deref().map(compile).transpose()?;

        let fields = config
            .fields
            .iter()
            .map(|rule| {
                Ok(FieldSelector {
                    name: rule.name.clone(),
                    selector: compile(&rule.selector)?,
                    attr: rule.attr.clone(),
                    required: rule.required,
                })
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self {
            record,
            links: compile(&config.link_selector)?,
            images: compile(&config.image_selector)?,
            fields,
            max_images: config.max_images,
            block_markers: config
                .block_markers
                .iter()
                .map(|marker| marker.to_lowercase())
                .collect(),
        })
    }

    /// Returns the first block marker found in `html`, compared case-insensitively
    pub fn find_block_marker(&self, html: &str) -> Option<&str> {
        if self.block_markers.is_empty() {
            return None;
        }
        let haystack = html.to_lowercase();
        self.block_markers
            .iter()
            .find(|marker| haystack.contains(marker.as_str()))
            .map(String::as_str)
    }
}

fn compile(selector: &str) -> ConfigResult<Selector> {
    Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldRule;

    #[test]
    fn test_compile_defaults() {
        let rules = ExtractionRules::compile(&ExtractionConfig::default()).unwrap();
        assert!(rules.record.is_none());
        assert!(rules.fields.is_empty());
    }

    #[test]
    fn test_compile_rejects_bad_field_selector() {
        let mut config = ExtractionConfig::default();
        config.fields.push(FieldRule {
            name: "title".to_string(),
            selector: "h1[[".to_string(),
            attr: None,
            required: true,
        });
        assert!(matches!(
            ExtractionRules::compile(&config),
            Err(ConfigError::InvalidSelector { .. })
        ));
    }

    #[test]
    fn test_block_marker_is_case_insensitive() {
        let config = ExtractionConfig {
            block_markers: vec!["Verify you are human".to_string()],
            ..ExtractionConfig::default()
        };
        let rules = ExtractionRules::compile(&config).unwrap();

        assert_eq!(
            rules.find_block_marker("<p>VERIFY YOU ARE HUMAN</p>"),
            Some("verify you are human")
        );
        assert_eq!(rules.find_block_marker("<p>welcome</p>"), None);
    }
}
