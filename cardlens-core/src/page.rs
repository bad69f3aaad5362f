//! Positioned token model: words, pages, and the loader-facing trait.
//!
//! Coordinates follow the loader's convention: x grows rightward, y grows
//! toward the bottom of the page, so "below" means larger y0.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// A positioned unit of text extracted from a document's text layer.
///
/// Produced once by the loader and never mutated. `text` arrives already
/// normalized (ligatures expanded, whitespace collapsed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom: Option<f64>,
}

impl Word {
    pub fn new(text: impl Into<String>, x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            text: text.into(),
            x0,
            y0,
            x1,
            y1,
            top: None,
            bottom: None,
        }
    }
}

/// One page of a loaded document: ordered words plus page dimensions.
///
/// Immutable after load. Word order is the loader's emission order, which the
/// anchor matcher depends on (first exact match wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page number.
    pub number: u32,
    pub width: f64,
    pub height: f64,
    pub words: Vec<Word>,
}

impl Page {
    pub fn new(number: u32, width: f64, height: f64, words: Vec<Word>) -> Self {
        Self {
            number,
            width,
            height,
            words,
        }
    }

    /// Words whose top-left or bottom-right corner falls inside the rectangle.
    pub fn words_in_region(&self, x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<&Word> {
        self.words
            .iter()
            .filter(|w| {
                (x0 <= w.x0 && w.x0 <= x1 && y0 <= w.y0 && w.y0 <= y1)
                    || (x0 <= w.x1 && w.x1 <= x1 && y0 <= w.y1 && w.y1 <= y1)
            })
            .collect()
    }

    /// Words sharing a horizontal band with `y`, within `tolerance`.
    pub fn words_on_line(&self, y: f64, tolerance: f64) -> Vec<&Word> {
        self.words
            .iter()
            .filter(|w| (w.y0 - y).abs() <= tolerance)
            .collect()
    }
}

/// Source of positioned pages for a document path.
///
/// Implementations own the underlying document handle and must release it on
/// every exit path before returning, success or failure. Load errors (missing
/// file, corrupt document) propagate to the caller untouched.
pub trait PageSource {
    fn load_pages(&self, path: &Path) -> anyhow::Result<Vec<Page>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Page {
        Page::new(
            1,
            595.0,
            842.0,
            vec![
                Word::new("alpha", 10.0, 100.0, 50.0, 112.0),
                Word::new("beta", 60.0, 100.0, 90.0, 112.0),
                Word::new("gamma", 10.0, 130.0, 50.0, 142.0),
            ],
        )
    }

    #[test]
    fn test_words_in_region_by_corner() {
        let p = page();
        // Region covering only the top-left corners of the first row.
        let hits = p.words_in_region(0.0, 95.0, 65.0, 105.0);
        let texts: Vec<_> = hits.iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_words_in_region_bottom_right_corner_counts() {
        let p = page();
        // Region that contains only gamma's bottom-right corner.
        let hits = p.words_in_region(45.0, 135.0, 60.0, 150.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "gamma");
    }

    #[test]
    fn test_words_on_line_tolerance() {
        let p = page();
        assert_eq!(p.words_on_line(101.5, 2.0).len(), 2);
        assert_eq!(p.words_on_line(101.5, 1.0).len(), 0);
    }

    #[test]
    fn test_word_serde_round_trip() {
        let w = Word::new("hello", 1.0, 2.0, 3.0, 4.0);
        let json = serde_json::to_string(&w).unwrap();
        let back: Word = serde_json::from_str(&json).unwrap();
        assert_eq!(w, back);
    }
}
