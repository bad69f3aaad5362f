//! Template detection over a directory of definitions.

use std::fs;
use std::path::{Path, PathBuf};

use cardlens_core::{Page, find_anchors_in_page};

use crate::error::ParseError;
use crate::template::{TemplateConfig, TemplateError, load_template};

/// Holds every template definition loaded from a directory and decides which
/// one matches a document.
pub struct TemplateDetector {
    templates: Vec<TemplateConfig>,
}

impl TemplateDetector {
    /// Load every `*.yaml`/`*.yml` definition in `dir`, in file-name order.
    ///
    /// A definition missing its id is skipped with a warning and a malformed
    /// one with an error; loading continues with the rest. A missing
    /// directory yields an empty detector.
    pub fn from_dir(dir: &Path) -> Self {
        let mut templates = Vec::new();

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("templates directory not found: {}: {err}", dir.display());
                return Self { templates };
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|ext| ext.to_str()),
                    Some("yaml" | "yml")
                )
            })
            .collect();
        paths.sort();

        for path in paths {
            match load_template(&path) {
                Ok(template) => {
                    log::debug!("loaded template: {}", template.template_id);
                    templates.push(template);
                }
                Err(err @ TemplateError::MissingId { .. }) => log::warn!("{err}"),
                Err(err) => log::error!("error loading template {}: {err}", path.display()),
            }
        }

        Self { templates }
    }

    /// Determine which loaded template matches the pages. Templates are tried
    /// in load order; the first whose page-match anchors are all present on a
    /// single page wins. `None` is "no match", not an error.
    pub fn detect(&self, pages: &[Page]) -> Option<&str> {
        for template in &self.templates {
            if matches_template(pages, template) {
                log::info!("document matches template: {}", template.template_id);
                return Some(&template.template_id);
            }
        }
        log::warn!("no matching template found");
        None
    }

    pub fn get(&self, template_id: &str) -> Option<&TemplateConfig> {
        self.templates
            .iter()
            .find(|t| t.template_id == template_id)
    }

    /// Like [`TemplateDetector::get`] but with the unknown id as a typed
    /// failure.
    pub fn require(&self, template_id: &str) -> Result<&TemplateConfig, ParseError> {
        self.get(template_id)
            .ok_or_else(|| ParseError::TemplateNotFound(template_id.to_string()))
    }

    pub fn templates(&self) -> &[TemplateConfig] {
        &self.templates
    }

    pub fn template_ids(&self) -> impl Iterator<Item = &str> {
        self.templates.iter().map(|t| t.template_id.as_str())
    }
}

/// True when all of the template's page-match anchors are found on a single
/// page.
pub fn matches_template(pages: &[Page], template: &TemplateConfig) -> bool {
    let must_contain = &template.page_match.must_contain;
    if must_contain.is_empty() {
        log::warn!(
            "template {} has no page-match anchors",
            template.template_id
        );
        return false;
    }

    for page in pages {
        let found = find_anchors_in_page(page, must_contain, template.page_match.fuzzy_threshold);
        if found.len() == must_contain.len() {
            log::debug!(
                "all required anchors found on page {} for {}",
                page.number,
                template.template_id
            );
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardlens_core::Word;
    use std::fs;
    use tempfile::tempdir;

    const GOOD: &str = r#"
template_id: good_v1
bank: Good Bank
page_match:
  must_contain: ["Statement Date", "Minimum Payment Due"]
  fuzzy_threshold: 85
"#;

    const NO_ID: &str = r#"
bank: Anonymous Bank
page_match:
  must_contain: ["Whatever"]
"#;

    fn pages_matching_good() -> Vec<Page> {
        vec![Page::new(
            1,
            595.0,
            842.0,
            vec![
                Word::new("Statement Date", 40.0, 100.0, 130.0, 112.0),
                Word::new("Minimum Payment Due", 40.0, 120.0, 180.0, 132.0),
            ],
        )]
    }

    #[test]
    fn test_from_dir_skips_bad_definitions() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a_good.yaml"), GOOD).unwrap();
        fs::write(dir.path().join("b_no_id.yaml"), NO_ID).unwrap();
        fs::write(dir.path().join("c_broken.yaml"), "::: not yaml [").unwrap();
        fs::write(dir.path().join("ignored.txt"), "not a template").unwrap();

        let detector = TemplateDetector::from_dir(dir.path());
        let ids: Vec<_> = detector.template_ids().collect();
        assert_eq!(ids, vec!["good_v1"]);
    }

    #[test]
    fn test_detect_matches_on_single_page() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("good.yaml"), GOOD).unwrap();
        let detector = TemplateDetector::from_dir(dir.path());

        assert_eq!(detector.detect(&pages_matching_good()), Some("good_v1"));
    }

    #[test]
    fn test_detect_requires_all_anchors_on_one_page() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("good.yaml"), GOOD).unwrap();
        let detector = TemplateDetector::from_dir(dir.path());

        // Anchors split across two pages must not match.
        let pages = vec![
            Page::new(
                1,
                595.0,
                842.0,
                vec![Word::new("Statement Date", 40.0, 100.0, 130.0, 112.0)],
            ),
            Page::new(
                2,
                595.0,
                842.0,
                vec![Word::new("Minimum Payment Due", 40.0, 100.0, 180.0, 112.0)],
            ),
        ];
        assert_eq!(detector.detect(&pages), None);
    }

    #[test]
    fn test_missing_dir_yields_empty_detector() {
        let detector = TemplateDetector::from_dir(Path::new("/nonexistent/templates"));
        assert!(detector.templates().is_empty());
    }

    #[test]
    fn test_require_unknown_template_is_typed_failure() {
        let detector = TemplateDetector::from_dir(Path::new("/nonexistent/templates"));
        assert!(matches!(
            detector.require("nope"),
            Err(ParseError::TemplateNotFound(_))
        ));
    }
}
