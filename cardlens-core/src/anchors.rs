//! Fuzzy anchor matching and anchor-relative region extraction.
//!
//! An anchor is a known label phrase used as a spatial landmark. Matching is
//! per-word: a multi-word phrase typically resolves to the word that best
//! contains (or is contained by) it under partial-ratio similarity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::normalize::{CellValue, PostProcess};
use crate::page::{Page, Word};

/// Default minimum similarity for a match to count as found.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 85.0;

/// Default horizontal search distance for same-line extraction.
pub const RIGHT_LINE_MAX_DISTANCE: f64 = 200.0;

const LINE_TOLERANCE: f64 = 2.0;

/// A located anchor: the matched word, a 0-100 confidence, and the target
/// phrase it was matched against.
#[derive(Debug, Clone)]
pub struct AnchorMatch {
    pub word: Word,
    pub confidence: f64,
    pub target: String,
}

/// Similarity of the best alignment of the shorter string as a contiguous
/// window of the longer, scored 0-100. An exact substring scores 100.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let (short, long) = if a_chars.len() <= b_chars.len() {
        (a_chars, b_chars)
    } else {
        (b_chars, a_chars)
    };
    if short.is_empty() {
        return 0.0;
    }

    let needle: String = short.iter().collect();
    let mut best = 0.0f64;
    for window in long.windows(short.len()) {
        let candidate: String = window.iter().collect();
        let score = strsim::normalized_levenshtein(&needle, &candidate) * 100.0;
        if score > best {
            best = score;
        }
    }
    best
}

/// Find the best matching anchor for `target` among `words`.
///
/// Words are scanned in list order. The first word whose text equals the
/// target case-insensitively wins outright with confidence 100; otherwise the
/// first word with the highest partial-ratio score at or above
/// `fuzzy_threshold` wins. Returns `None` when nothing reaches the threshold.
pub fn find_anchor(words: &[Word], target: &str, fuzzy_threshold: f64) -> Option<AnchorMatch> {
    let target_lower = target.to_lowercase();
    let mut best: Option<AnchorMatch> = None;
    let mut best_confidence = 0.0f64;

    for word in words {
        if word.text.to_lowercase() == target_lower {
            return Some(AnchorMatch {
                word: word.clone(),
                confidence: 100.0,
                target: target.to_string(),
            });
        }

        let confidence = partial_ratio(&word.text.to_lowercase(), &target_lower);
        if confidence > best_confidence && confidence >= fuzzy_threshold {
            best_confidence = confidence;
            best = Some(AnchorMatch {
                word: word.clone(),
                confidence,
                target: target.to_string(),
            });
        }
    }

    best
}

/// Find multiple anchors in a page. Missing anchors are simply absent from
/// the result map, not an error.
pub fn find_anchors_in_page(
    page: &Page,
    targets: &[String],
    fuzzy_threshold: f64,
) -> BTreeMap<String, AnchorMatch> {
    let mut results = BTreeMap::new();
    for target in targets {
        match find_anchor(&page.words, target, fuzzy_threshold) {
            Some(anchor) => {
                log::debug!(
                    "found anchor '{}' with confidence {:.1}",
                    target,
                    anchor.confidence
                );
                results.insert(target.clone(), anchor);
            }
            None => log::warn!("anchor '{}' not found on page {}", target, page.number),
        }
    }
    results
}

/// Extract text from a box region offset from an anchor.
///
/// The region is the anchor's bounding box shifted by the four offsets. Words
/// are ordered top-to-bottom then left-to-right and joined with spaces.
pub fn extract_box_region(
    page: &Page,
    anchor: &AnchorMatch,
    dx1: f64,
    dy1: f64,
    dx2: f64,
    dy2: f64,
) -> String {
    let x0 = anchor.word.x0 + dx1;
    let y0 = anchor.word.y0 + dy1;
    let x1 = anchor.word.x1 + dx2;
    let y1 = anchor.word.y1 + dy2;

    let mut in_region = page.words_in_region(x0, y0, x1, y1);
    in_region.sort_by(|a, b| a.y0.total_cmp(&b.y0).then(a.x0.total_cmp(&b.x0)));

    let joined = in_region
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    joined.trim().to_string()
}

/// Extract text to the right of an anchor on the same line, up to
/// `max_distance` from the anchor's right edge.
pub fn extract_right_line(page: &Page, anchor: &AnchorMatch, max_distance: f64) -> String {
    let mut right_words: Vec<&Word> = page
        .words_on_line(anchor.word.y0, LINE_TOLERANCE)
        .into_iter()
        .filter(|w| w.x0 > anchor.word.x1 && (w.x0 - anchor.word.x1) <= max_distance)
        .collect();
    right_words.sort_by(|a, b| a.x0.total_cmp(&b.x0));

    let joined = right_words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    joined.trim().to_string()
}

/// Search direction for [`find_nearest_word`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Right,
    Left,
    Up,
    Down,
}

/// Find the nearest word in a specific direction from an anchor.
///
/// Right/left require vertical overlap within 5 units of the anchor's band;
/// up/down require the left edges to align within 50 units.
pub fn find_nearest_word<'a>(
    words: &'a [Word],
    anchor: &AnchorMatch,
    direction: Direction,
    max_distance: f64,
) -> Option<&'a Word> {
    let a = &anchor.word;
    let mut nearest: Option<&Word> = None;
    let mut min_distance = f64::INFINITY;

    for word in words {
        if word == a {
            continue;
        }

        let distance = match direction {
            Direction::Right => {
                if word.x0 > a.x1 && word.y0 <= a.y1 + 5.0 && word.y0 >= a.y0 - 5.0 {
                    word.x0 - a.x1
                } else {
                    continue;
                }
            }
            Direction::Left => {
                if word.x1 < a.x0 && word.y0 <= a.y1 + 5.0 && word.y0 >= a.y0 - 5.0 {
                    a.x0 - word.x1
                } else {
                    continue;
                }
            }
            Direction::Down => {
                if word.y0 > a.y1 && (word.x0 - a.x0).abs() <= 50.0 {
                    word.y0 - a.y1
                } else {
                    continue;
                }
            }
            Direction::Up => {
                if word.y1 < a.y0 && (word.x0 - a.x0).abs() <= 50.0 {
                    a.y0 - word.y1
                } else {
                    continue;
                }
            }
        };

        if distance <= max_distance && distance < min_distance {
            min_distance = distance;
            nearest = Some(word);
        }
    }

    nearest
}

/// How a field's value is read once its anchor is found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExtractStrategy {
    /// Collect words inside a box offset from the anchor.
    Box {
        dx1: f64,
        dy1: f64,
        dx2: f64,
        dy2: f64,
    },
    /// Collect words on the anchor's line, to its right.
    RightLine,
}

/// A validated field specification: anchor phrase, threshold, extraction
/// strategy, and the post-processing that types the raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub find: String,
    pub fuzzy_threshold: f64,
    pub strategy: ExtractStrategy,
    pub post: PostProcess,
}

/// Extract and type a single field from a page.
///
/// Returns `None` when the anchor is missing, the region is empty after
/// trimming, or a date fails to parse. Field absence is not an error.
pub fn extract_field(page: &Page, spec: &FieldSpec, statement_year: i32) -> Option<CellValue> {
    let anchor = find_anchor(&page.words, &spec.find, spec.fuzzy_threshold)?;

    let raw = match spec.strategy {
        ExtractStrategy::RightLine => extract_right_line(page, &anchor, RIGHT_LINE_MAX_DISTANCE),
        ExtractStrategy::Box { dx1, dy1, dx2, dy2 } => {
            extract_box_region(page, &anchor, dx1, dy1, dx2, dy2)
        }
    };

    spec.post.apply(&raw, statement_year)
}
