//! JSON token-dump page source.
//!
//! The CLI consumes documents as token dumps: the output of a PDF text
//! extractor serialized as JSON pages of positioned words. Word text is
//! re-normalized on load (ligatures expanded, whitespace collapsed, empty
//! words dropped) so dumps from different extractors behave alike.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use cardlens_core::{Page, PageSource};

#[derive(Debug, Deserialize)]
struct PageDump {
    pages: Vec<Page>,
}

const LIGATURES: [(&str, &str); 7] = [
    ("\u{fb01}", "fi"),
    ("\u{fb02}", "fl"),
    ("\u{fb00}", "ff"),
    ("\u{fb03}", "ffi"),
    ("\u{fb04}", "ffl"),
    ("\u{fb06}", "st"),
    ("\u{fb05}", "st"),
];

fn normalize_text(text: &str) -> String {
    let mut text = text.to_string();
    for (ligature, replacement) in LIGATURES {
        if text.contains(ligature) {
            text = text.replace(ligature, replacement);
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_page(mut page: Page) -> Page {
    page.words = page
        .words
        .into_iter()
        .filter_map(|mut word| {
            word.text = normalize_text(&word.text);
            if word.text.is_empty() { None } else { Some(word) }
        })
        .collect();
    page
}

/// Loads pages from a token-dump file. The handle is scoped to the call and
/// released on every path, success or failure.
pub struct JsonPageSource;

impl PageSource for JsonPageSource {
    fn load_pages(&self, path: &Path) -> Result<Vec<Page>> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let dump: PageDump = serde_json::from_str(&text)
            .with_context(|| format!("parsing token dump {}", path.display()))?;
        log::debug!("loaded {} pages from {}", dump.pages.len(), path.display());
        Ok(dump.pages.into_iter().map(normalize_page).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_normalize_text_expands_ligatures() {
        assert_eq!(normalize_text("o\u{fb03}ce   hours"), "office hours");
    }

    #[test]
    fn test_load_pages_drops_empty_words() {
        let dump = r#"{
            "pages": [{
                "number": 1,
                "width": 595.0,
                "height": 842.0,
                "words": [
                    { "text": "  Statement   Date ", "x0": 40.0, "y0": 100.0, "x1": 130.0, "y1": 112.0 },
                    { "text": "   ", "x0": 200.0, "y0": 100.0, "x1": 210.0, "y1": 112.0 }
                ]
            }]
        }"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(dump.as_bytes()).unwrap();

        let pages = JsonPageSource.load_pages(file.path()).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].words.len(), 1);
        assert_eq!(pages[0].words[0].text, "Statement Date");
    }

    #[test]
    fn test_load_pages_rejects_malformed_dump() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not json").unwrap();
        assert!(JsonPageSource.load_pages(file.path()).is_err());
    }
}
