//! Row/column table reconstruction from positioned words.
//!
//! Rows are rebuilt by clustering words on vertical proximity, then cells by
//! horizontal column ranges. The clustering is a greedy single pass over
//! words sorted by y0: a word joins the current row when it is within
//! `row_gap` of the *previous* word in sort order. The rule chains, so a long
//! run of words each close to its predecessor stays one row even when the
//! first and last are far apart. It is deterministic but not a symmetric
//! distance clustering.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::anchors::{DEFAULT_FUZZY_THRESHOLD, find_anchor};
use crate::normalize::{
    CellValue, FxInfo, PostProcess, TxnKind, clean_merchant_name, extract_fx_info,
    transaction_type,
};
use crate::page::{Page, Word};

/// Default vertical gap separating two rows.
pub const DEFAULT_ROW_GAP: f64 = 7.0;

const HEADER_GAP: f64 = 5.0;
const ANCHOR_GAP: f64 = 10.0;

static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// A table column: horizontal extent plus the normalization for its cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub x1: f64,
    pub x2: f64,
    pub kind: PostProcess,
}

/// Transactions-table header. Every label must resolve to an anchor for the
/// table to be extracted at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderSpec {
    pub labels: Vec<String>,
    pub fuzzy_threshold: f64,
}

/// Cluster words into rows by vertical proximity (see module docs).
pub fn cluster_rows<'a>(words: &[&'a Word], row_gap: f64) -> Vec<Vec<&'a Word>> {
    let mut sorted: Vec<&Word> = words.to_vec();
    sorted.sort_by(|a, b| a.y0.total_cmp(&b.y0));

    let mut rows: Vec<Vec<&Word>> = Vec::new();
    let mut current: Vec<&Word> = Vec::new();
    let mut last_y: Option<f64> = None;

    for word in sorted {
        if let Some(y) = last_y {
            if (word.y0 - y) > row_gap {
                rows.push(std::mem::take(&mut current));
            }
        }
        current.push(word);
        last_y = Some(word.y0);
    }
    if !current.is_empty() {
        rows.push(current);
    }
    rows
}

/// Typed cells of one table row, keyed by column name. Cells that come out
/// empty (or fail date parsing) are absent.
pub type RowValues = BTreeMap<String, CellValue>;

/// Assign a row's words to columns and normalize each cell. A word belongs to
/// a column when its bounding box lies fully inside the column's x-range.
pub fn row_values(row: &[&Word], columns: &[ColumnSpec], statement_year: i32) -> RowValues {
    let mut values = RowValues::new();
    for column in columns {
        let mut cell_words: Vec<&Word> = row
            .iter()
            .copied()
            .filter(|w| w.x0 >= column.x1 && w.x1 <= column.x2)
            .collect();
        cell_words.sort_by(|a, b| a.x0.total_cmp(&b.x0));

        let text = cell_words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(value) = column.kind.apply(&text, statement_year) {
            values.insert(column.name.clone(), value);
        }
    }
    values
}

/// Normalized output of transaction-table extraction (currency-agnostic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxnRow {
    pub transaction_date: NaiveDate,
    pub posting_date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub reference: Option<String>,
    pub kind: TxnKind,
    pub fx: Option<FxInfo>,
}

/// Extracts transaction rows from one page using configured columns.
///
/// The column set must include `transaction_date` and `amount`; rows missing
/// either are discarded silently (blank and decorative rows are expected).
pub struct TransactionTable<'a> {
    page: &'a Page,
    columns: &'a [ColumnSpec],
}

impl<'a> TransactionTable<'a> {
    pub fn new(page: &'a Page, columns: &'a [ColumnSpec]) -> Self {
        Self { page, columns }
    }

    /// Extract transactions below the table header.
    ///
    /// A row whose joined text contains `reference_prefix` is a continuation
    /// line: its first digit run becomes the reference of the next data row
    /// and the line itself emits nothing.
    pub fn extract(
        &self,
        header: &HeaderSpec,
        statement_year: i32,
        row_gap: f64,
        reference_prefix: Option<&str>,
        fx_prefixes: &[String],
    ) -> Vec<TxnRow> {
        let Some(header_y) = self.header_y(header) else {
            log::warn!(
                "could not find transactions header on page {}",
                self.page.number
            );
            return Vec::new();
        };

        let candidates: Vec<&Word> = self
            .page
            .words
            .iter()
            .filter(|w| w.y0 > header_y + HEADER_GAP)
            .collect();
        let rows = cluster_rows(&candidates, row_gap);

        let mut transactions = Vec::new();
        let mut pending_reference: Option<String> = None;

        for row in &rows {
            if let Some(prefix) = reference_prefix {
                if row_contains(row, prefix) {
                    pending_reference = extract_reference(row, prefix);
                    continue;
                }
            }

            // A pending reference survives skipped rows and is consumed by
            // the next row that actually yields a transaction.
            if let Some(txn) =
                self.txn_from_row(row, statement_year, pending_reference.clone(), fx_prefixes)
            {
                transactions.push(txn);
                pending_reference = None;
            }
        }

        transactions
    }

    /// Resolve every header label; the header line sits at the minimum y0
    /// across the matched words. Any missing label fails the whole lookup.
    fn header_y(&self, header: &HeaderSpec) -> Option<f64> {
        if header.labels.is_empty() {
            return None;
        }
        let mut min_y = f64::INFINITY;
        for label in &header.labels {
            match find_anchor(&self.page.words, label, header.fuzzy_threshold) {
                Some(anchor) => min_y = min_y.min(anchor.word.y0),
                None => {
                    log::warn!("header label '{}' not found", label);
                    return None;
                }
            }
        }
        Some(min_y)
    }

    fn txn_from_row(
        &self,
        row: &[&Word],
        statement_year: i32,
        reference: Option<String>,
        fx_prefixes: &[String],
    ) -> Option<TxnRow> {
        let values = row_values(row, self.columns, statement_year);

        let transaction_date = values.get("transaction_date")?.as_date()?;
        let amount = values.get("amount")?.as_money()?;
        // Zero means the cell failed to parse or the row is decorative.
        if amount.is_zero() {
            return None;
        }

        let raw_description = values
            .get("description")
            .and_then(CellValue::as_text)
            .unwrap_or("")
            .to_string();
        let posting_date = values
            .get("posting_date")
            .and_then(CellValue::as_date)
            .unwrap_or(transaction_date);

        let description = clean_merchant_name(&raw_description);
        let kind = transaction_type(&raw_description, amount);
        let fx = extract_fx_info(&description, fx_prefixes);

        Some(TxnRow {
            transaction_date,
            posting_date,
            description,
            amount,
            reference,
            kind,
            fx,
        })
    }
}

fn row_text(row: &[&Word]) -> String {
    row.iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn row_contains(row: &[&Word], prefix: &str) -> bool {
    row_text(row).to_uppercase().contains(&prefix.to_uppercase())
}

fn extract_reference(row: &[&Word], prefix: &str) -> Option<String> {
    let text = row_text(row).to_uppercase();
    let prefix_upper = prefix.to_uppercase();
    let idx = text.find(&prefix_upper)?;
    let after = &text[idx + prefix_upper.len()..];
    DIGITS_RE.find(after).map(|m| m.as_str().to_string())
}

/// Extract rows of a single-anchor table (instalments, rewards-by-card).
///
/// Collects every word below the anchor and reuses the transaction-table row
/// and column machinery; callers filter rows by their own required cells.
pub fn extract_anchored_rows(
    page: &Page,
    anchor: &str,
    columns: &[ColumnSpec],
    statement_year: i32,
    row_gap: f64,
) -> Vec<RowValues> {
    let Some(anchor_match) = find_anchor(&page.words, anchor, DEFAULT_FUZZY_THRESHOLD) else {
        log::debug!("table anchor '{}' not found on page {}", anchor, page.number);
        return Vec::new();
    };

    let anchor_y = anchor_match.word.y0;
    let candidates: Vec<&Word> = page
        .words
        .iter()
        .filter(|w| w.y0 > anchor_y + ANCHOR_GAP)
        .collect();

    cluster_rows(&candidates, row_gap)
        .iter()
        .map(|row| row_values(row, columns, statement_year))
        .filter(|values| !values.is_empty())
        .collect()
}

/// Secondary table-extraction engine consulted when geometric extraction
/// finds nothing on a page. Implementations must swallow their own failures
/// and return an empty list; errors never cross this boundary.
pub trait TableEngine {
    fn extract_table(
        &self,
        path: &Path,
        page_num: u32,
        area: (f64, f64, f64, f64),
        columns: &[String],
    ) -> Vec<BTreeMap<String, String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, x1: f64, x2: f64, kind: PostProcess) -> ColumnSpec {
        ColumnSpec {
            name: name.to_string(),
            x1,
            x2,
            kind,
        }
    }

    fn txn_columns() -> Vec<ColumnSpec> {
        vec![
            col("transaction_date", 40.0, 100.0, PostProcess::Date("%d %b".into())),
            col("posting_date", 100.0, 160.0, PostProcess::Date("%d %b".into())),
            col("description", 160.0, 420.0, PostProcess::Trim),
            col("amount", 420.0, 560.0, PostProcess::MoneyNegIfCr),
        ]
    }

    fn header_words(y: f64) -> Vec<Word> {
        vec![
            Word::new("Transaction Date", 40.0, y, 95.0, y + 12.0),
            Word::new("Posting Date", 100.0, y, 150.0, y + 12.0),
            Word::new("Description", 160.0, y, 240.0, y + 12.0),
            Word::new("Amount", 480.0, y, 540.0, y + 12.0),
        ]
    }

    fn txn_row_words(y: f64, date: &str, post: &str, desc: &str, amount: &str) -> Vec<Word> {
        vec![
            Word::new(date, 45.0, y, 85.0, y + 12.0),
            Word::new(post, 105.0, y, 145.0, y + 12.0),
            Word::new(desc, 165.0, y, 400.0, y + 12.0),
            Word::new(amount, 470.0, y, 520.0, y + 12.0),
        ]
    }

    fn header_spec() -> HeaderSpec {
        HeaderSpec {
            labels: vec![
                "Transaction Date".into(),
                "Posting Date".into(),
                "Description".into(),
                "Amount".into(),
            ],
            fuzzy_threshold: 80.0,
        }
    }

    #[test]
    fn test_cluster_rows_chains_within_gap() {
        let words: Vec<Word> = [0.0, 5.0, 10.0, 15.0]
            .iter()
            .map(|y| Word::new("w", 0.0, *y, 10.0, *y + 12.0))
            .collect();
        let refs: Vec<&Word> = words.iter().collect();
        let rows = cluster_rows(&refs, 7.0);
        // Each word is within 7.0 of its predecessor, so the chain holds even
        // though the first and last differ by 15.0.
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 4);
    }

    #[test]
    fn test_cluster_rows_splits_on_gap() {
        let words: Vec<Word> = [0.0, 3.0, 20.0, 22.0]
            .iter()
            .map(|y| Word::new("w", 0.0, *y, 10.0, *y + 12.0))
            .collect();
        let refs: Vec<&Word> = words.iter().collect();
        let rows = cluster_rows(&refs, 7.0);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 2);
        assert_eq!(rows[1].len(), 2);
    }

    #[test]
    fn test_cluster_rows_is_deterministic() {
        let words: Vec<Word> = [9.0, 2.0, 30.0, 3.0, 31.0]
            .iter()
            .enumerate()
            .map(|(i, y)| Word::new(format!("w{i}"), i as f64, *y, i as f64 + 5.0, *y + 12.0))
            .collect();
        let refs: Vec<&Word> = words.iter().collect();
        let first = cluster_rows(&refs, 7.0);
        let second = cluster_rows(&refs, 7.0);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_extract_transactions_basic() {
        let mut words = header_words(80.0);
        words.extend(txn_row_words(
            100.0,
            "17 Jul",
            "18 Jul",
            "CHEERS - PARKLANE S SINGAPORE SG",
            "10.00",
        ));
        let page = Page::new(2, 595.0, 842.0, words);
        let columns = txn_columns();
        let table = TransactionTable::new(&page, &columns);
        let txns = table.extract(&header_spec(), 2025, 7.0, None, &[]);

        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].description, "CHEERS - PARKLANE S");
        assert_eq!(txns[0].kind, TxnKind::Purchase);
        assert_eq!(
            txns[0].transaction_date,
            NaiveDate::from_ymd_opt(2025, 7, 17).unwrap()
        );
        assert_eq!(
            txns[0].posting_date,
            NaiveDate::from_ymd_opt(2025, 7, 18).unwrap()
        );
    }

    #[test]
    fn test_reference_line_attaches_to_next_row() {
        let mut words = header_words(80.0);
        words.push(Word::new("Transaction Ref", 165.0, 100.0, 240.0, 112.0));
        words.push(Word::new("74508985217021376353487", 245.0, 100.0, 380.0, 112.0));
        words.extend(txn_row_words(
            115.0,
            "17 Jul",
            "18 Jul",
            "CHEERS - PARKLANE S",
            "10.00",
        ));
        let page = Page::new(2, 595.0, 842.0, words);
        let columns = txn_columns();
        let table = TransactionTable::new(&page, &columns);
        let txns = table.extract(&header_spec(), 2025, 7.0, Some("Transaction Ref"), &[]);

        assert_eq!(txns.len(), 1);
        assert_eq!(
            txns[0].reference.as_deref(),
            Some("74508985217021376353487")
        );
    }

    #[test]
    fn test_reference_consumed_once() {
        let mut words = header_words(80.0);
        words.push(Word::new("Transaction Ref", 165.0, 100.0, 240.0, 112.0));
        words.push(Word::new("111222333", 245.0, 100.0, 320.0, 112.0));
        words.extend(txn_row_words(115.0, "17 Jul", "18 Jul", "FIRST", "10.00"));
        words.extend(txn_row_words(130.0, "18 Jul", "19 Jul", "SECOND", "20.00"));
        let page = Page::new(2, 595.0, 842.0, words);
        let columns = txn_columns();
        let table = TransactionTable::new(&page, &columns);
        let txns = table.extract(&header_spec(), 2025, 7.0, Some("Transaction Ref"), &[]);

        assert_eq!(txns.len(), 2);
        assert_eq!(txns[0].reference.as_deref(), Some("111222333"));
        assert_eq!(txns[1].reference, None);
    }

    #[test]
    fn test_zero_amount_row_discarded() {
        let mut words = header_words(80.0);
        words.extend(txn_row_words(100.0, "17 Jul", "18 Jul", "FEE WAIVED", "0.00"));
        let page = Page::new(2, 595.0, 842.0, words);
        let columns = txn_columns();
        let table = TransactionTable::new(&page, &columns);
        assert!(table.extract(&header_spec(), 2025, 7.0, None, &[]).is_empty());
    }

    #[test]
    fn test_missing_header_label_fails_extraction() {
        let mut words = header_words(80.0);
        words.retain(|w| w.text != "Amount");
        words.extend(txn_row_words(100.0, "17 Jul", "18 Jul", "CHEERS", "10.00"));
        let page = Page::new(2, 595.0, 842.0, words);
        let columns = txn_columns();
        let table = TransactionTable::new(&page, &columns);
        assert!(table.extract(&header_spec(), 2025, 7.0, None, &[]).is_empty());
    }

    #[test]
    fn test_fx_attached_from_cleaned_description() {
        let mut words = header_words(80.0);
        words.extend(txn_row_words(
            100.0,
            "19 Jul",
            "20 Jul",
            "USD 25.00 AMAZON.COM SG",
            "34.20",
        ));
        let page = Page::new(2, 595.0, 842.0, words);
        let columns = txn_columns();
        let table = TransactionTable::new(&page, &columns);
        let prefixes = vec!["USD ".to_string()];
        let txns = table.extract(&header_spec(), 2025, 7.0, None, &prefixes);

        assert_eq!(txns.len(), 1);
        let fx = txns[0].fx.as_ref().unwrap();
        assert_eq!(fx.currency, "USD");
        assert_eq!(fx.original_amount, Decimal::new(2500, 2));
    }

    #[test]
    fn test_anchored_rows_below_anchor_only() {
        let words = vec![
            Word::new("above", 45.0, 40.0, 100.0, 52.0),
            Word::new("INSTALMENT PLAN SUMMARY", 40.0, 60.0, 250.0, 72.0),
            Word::new("4864-18XX-XXXX-1669", 45.0, 90.0, 155.0, 102.0),
            Word::new("4,000.00", 405.0, 90.0, 455.0, 102.0),
        ];
        let page = Page::new(3, 595.0, 842.0, words);
        let columns = vec![
            col("card_masked", 40.0, 160.0, PostProcess::Trim),
            col("principal_amount", 400.0, 460.0, PostProcess::Money),
        ];
        let rows = extract_anchored_rows(&page, "INSTALMENT PLAN SUMMARY", &columns, 2025, 7.0);

        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].get("card_masked").and_then(CellValue::as_text),
            Some("4864-18XX-XXXX-1669")
        );
        assert_eq!(
            rows[0].get("principal_amount").and_then(|v| v.as_money()),
            Some(Decimal::new(400000, 2))
        );
    }
}
