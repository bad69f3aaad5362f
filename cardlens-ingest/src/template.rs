//! Template definition schema: the raw YAML shape and its validation into
//! typed extraction specs.
//!
//! Validation happens once at load time. Unknown strategies and unknown
//! post-processing spellings are load errors, so a typo'd template fails
//! before any document is parsed rather than mid-extraction.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use cardlens_core::{
    ColumnSpec, DEFAULT_FUZZY_THRESHOLD, DEFAULT_ROW_GAP, ExtractStrategy, FieldSpec, HeaderSpec,
    PostProcess, UnknownPostType,
};

const DEFAULT_HEADER_THRESHOLD: f64 = 80.0;
const DEFAULT_BOX_DX2: f64 = 100.0;
const DEFAULT_BOX_DY2: f64 = 20.0;
const DEFAULT_CURRENCY: &str = "SGD";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{} has no template_id", path.display())]
    MissingId { path: PathBuf },

    #[error("field `{name}`: unknown extraction strategy `{strategy}`")]
    UnknownStrategy { name: String, strategy: String },

    #[error("`{name}`: {source}")]
    UnknownPostType {
        name: String,
        #[source]
        source: UnknownPostType,
    },
}

/// Anchors that must all be present on a single page for a template to
/// apply to a document.
#[derive(Debug, Clone, PartialEq)]
pub struct PageMatch {
    pub must_contain: Vec<String>,
    pub fuzzy_threshold: f64,
}

/// Which pages carry transactions, and the phrases that end extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRange {
    pub start_after_page: usize,
    pub stop_on_anchors: Vec<String>,
}

/// Transactions-table configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionsSpec {
    pub pages: PageRange,
    pub header: HeaderSpec,
    pub columns: Vec<ColumnSpec>,
    pub row_gap: f64,
    pub reference_prefix: Option<String>,
    pub fx_prefixes: Vec<String>,
}

/// Instalments-table configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct InstalmentsSpec {
    pub anchor: String,
    pub columns: Vec<ColumnSpec>,
}

/// Rewards configuration: summary fields plus the per-card table.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardsSpec {
    pub anchor: String,
    pub fields: BTreeMap<String, FieldSpec>,
    pub by_card_columns: Vec<ColumnSpec>,
}

/// A validated, read-only template definition keyed by `template_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateConfig {
    pub template_id: String,
    pub bank: String,
    pub currency: String,
    pub page_match: PageMatch,
    pub fields: BTreeMap<String, FieldSpec>,
    pub transactions: Option<TransactionsSpec>,
    pub instalments: Option<InstalmentsSpec>,
    pub rewards: Option<RewardsSpec>,
}

// Raw serde shapes, converted to the typed specs above during validation.

#[derive(Debug, Deserialize)]
struct RawTemplate {
    template_id: Option<String>,
    bank: Option<String>,
    currency: Option<String>,
    #[serde(default)]
    page_match: RawPageMatch,
    #[serde(default)]
    fields: BTreeMap<String, RawField>,
    transactions: Option<RawTransactions>,
    instalments: Option<RawInstalments>,
    rewards: Option<RawRewards>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPageMatch {
    #[serde(default)]
    must_contain: Vec<String>,
    fuzzy_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    find: String,
    fuzzy_threshold: Option<f64>,
    strategy: Option<String>,
    #[serde(rename = "box")]
    box_offsets: Option<RawBox>,
    post: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBox {
    #[serde(default)]
    dx1: f64,
    #[serde(default)]
    dy1: f64,
    dx2: Option<f64>,
    dy2: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawTransactions {
    #[serde(default)]
    pages: RawPages,
    header: RawHeader,
    columns: Vec<RawColumn>,
    row_gap: Option<f64>,
    reference_prefix: Option<String>,
    #[serde(default)]
    fx_inline_line_prefixes: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPages {
    start_after_page: Option<usize>,
    #[serde(default)]
    stop_on_anchors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    label: Vec<String>,
    fuzzy_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawColumn {
    name: String,
    x1: f64,
    x2: f64,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInstalments {
    anchor: String,
    columns: Vec<RawColumn>,
}

#[derive(Debug, Deserialize)]
struct RawRewards {
    anchor: String,
    #[serde(default)]
    fields: BTreeMap<String, RawField>,
    by_card_table: Option<RawByCard>,
}

#[derive(Debug, Deserialize)]
struct RawByCard {
    columns: Vec<RawColumn>,
}

/// Load and validate a single template definition file.
pub fn load_template(path: &Path) -> Result<TemplateConfig, TemplateError> {
    let text = fs::read_to_string(path).map_err(|source| TemplateError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawTemplate = serde_yaml::from_str(&text).map_err(|source| TemplateError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    validate(raw, path)
}

fn validate(raw: RawTemplate, path: &Path) -> Result<TemplateConfig, TemplateError> {
    let template_id = raw
        .template_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| TemplateError::MissingId {
            path: path.to_path_buf(),
        })?;

    Ok(TemplateConfig {
        template_id,
        bank: raw.bank.unwrap_or_default(),
        currency: raw.currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        page_match: PageMatch {
            must_contain: raw.page_match.must_contain,
            fuzzy_threshold: raw
                .page_match
                .fuzzy_threshold
                .unwrap_or(DEFAULT_FUZZY_THRESHOLD),
        },
        fields: field_specs(raw.fields)?,
        transactions: raw.transactions.map(transactions_spec).transpose()?,
        instalments: raw.instalments.map(instalments_spec).transpose()?,
        rewards: raw.rewards.map(rewards_spec).transpose()?,
    })
}

fn field_specs(
    raw: BTreeMap<String, RawField>,
) -> Result<BTreeMap<String, FieldSpec>, TemplateError> {
    raw.into_iter()
        .map(|(name, field)| {
            let spec = field_spec(&name, field)?;
            Ok((name, spec))
        })
        .collect()
}

fn field_spec(name: &str, raw: RawField) -> Result<FieldSpec, TemplateError> {
    let strategy = match raw.strategy.as_deref().unwrap_or("box") {
        "right_line" => ExtractStrategy::RightLine,
        "box" => {
            let offsets = raw.box_offsets.unwrap_or_default();
            ExtractStrategy::Box {
                dx1: offsets.dx1,
                dy1: offsets.dy1,
                dx2: offsets.dx2.unwrap_or(DEFAULT_BOX_DX2),
                dy2: offsets.dy2.unwrap_or(DEFAULT_BOX_DY2),
            }
        }
        other => {
            return Err(TemplateError::UnknownStrategy {
                name: name.to_string(),
                strategy: other.to_string(),
            });
        }
    };

    let post = match raw.post {
        Some(spelling) => {
            PostProcess::parse(&spelling).map_err(|source| TemplateError::UnknownPostType {
                name: name.to_string(),
                source,
            })?
        }
        None => PostProcess::Trim,
    };

    Ok(FieldSpec {
        find: raw.find,
        fuzzy_threshold: raw.fuzzy_threshold.unwrap_or(DEFAULT_FUZZY_THRESHOLD),
        strategy,
        post,
    })
}

fn column_specs(raw: Vec<RawColumn>) -> Result<Vec<ColumnSpec>, TemplateError> {
    raw.into_iter()
        .map(|column| {
            let kind = match column.kind.as_deref() {
                None | Some("text") => PostProcess::Trim,
                Some(spelling) => PostProcess::parse(spelling).map_err(|source| {
                    TemplateError::UnknownPostType {
                        name: column.name.clone(),
                        source,
                    }
                })?,
            };
            Ok(ColumnSpec {
                name: column.name,
                x1: column.x1,
                x2: column.x2,
                kind,
            })
        })
        .collect()
}

fn transactions_spec(raw: RawTransactions) -> Result<TransactionsSpec, TemplateError> {
    Ok(TransactionsSpec {
        pages: PageRange {
            start_after_page: raw.pages.start_after_page.unwrap_or(1),
            stop_on_anchors: raw.pages.stop_on_anchors,
        },
        header: HeaderSpec {
            labels: raw.header.label,
            fuzzy_threshold: raw
                .header
                .fuzzy_threshold
                .unwrap_or(DEFAULT_HEADER_THRESHOLD),
        },
        columns: column_specs(raw.columns)?,
        row_gap: raw.row_gap.unwrap_or(DEFAULT_ROW_GAP),
        reference_prefix: raw.reference_prefix,
        fx_prefixes: raw.fx_inline_line_prefixes,
    })
}

fn instalments_spec(raw: RawInstalments) -> Result<InstalmentsSpec, TemplateError> {
    Ok(InstalmentsSpec {
        anchor: raw.anchor,
        columns: column_specs(raw.columns)?,
    })
}

fn rewards_spec(raw: RawRewards) -> Result<RewardsSpec, TemplateError> {
    Ok(RewardsSpec {
        anchor: raw.anchor,
        fields: field_specs(raw.fields)?,
        by_card_columns: raw
            .by_card_table
            .map(|t| column_specs(t.columns))
            .transpose()?
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn load_str(yaml: &str) -> Result<TemplateConfig, TemplateError> {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        load_template(file.path())
    }

    const MINIMAL: &str = r#"
template_id: test_bank_v1
bank: Test Bank
page_match:
  must_contain: ["Statement Date"]
  fuzzy_threshold: 85
fields:
  statement_date:
    find: "Statement Date"
    strategy: right_line
    post: "date:%d %b %Y"
  card_masked:
    find: "Card Number"
    strategy: box
    box: { dx1: -5, dy1: 10, dx2: 20, dy2: 20 }
transactions:
  pages:
    start_after_page: 1
    stop_on_anchors: ["Important Information"]
  header:
    label: ["Date", "Description", "Amount"]
    fuzzy_threshold: 80
  columns:
    - { name: transaction_date, x1: 40, x2: 100, type: "date:%d %b" }
    - { name: description, x1: 160, x2: 420, type: text }
    - { name: amount, x1: 420, x2: 560, type: money_neg_if_cr }
  row_gap: 7
  reference_prefix: "Transaction Ref"
  fx_inline_line_prefixes: ["USD ", "EUR "]
"#;

    #[test]
    fn test_load_minimal_template() {
        let template = load_str(MINIMAL).unwrap();
        assert_eq!(template.template_id, "test_bank_v1");
        assert_eq!(template.currency, "SGD");
        assert_eq!(template.page_match.must_contain.len(), 1);

        let date_field = &template.fields["statement_date"];
        assert_eq!(date_field.strategy, ExtractStrategy::RightLine);
        assert_eq!(date_field.post, PostProcess::Date("%d %b %Y".into()));

        let card_field = &template.fields["card_masked"];
        assert!(matches!(card_field.strategy, ExtractStrategy::Box { .. }));
        assert_eq!(card_field.post, PostProcess::Trim);

        let txns = template.transactions.as_ref().unwrap();
        assert_eq!(txns.pages.start_after_page, 1);
        assert_eq!(txns.reference_prefix.as_deref(), Some("Transaction Ref"));
        assert_eq!(txns.columns[2].kind, PostProcess::MoneyNegIfCr);
        assert!(template.instalments.is_none());
        assert!(template.rewards.is_none());
    }

    #[test]
    fn test_missing_template_id_is_error() {
        let yaml = "bank: Test Bank\npage_match:\n  must_contain: [\"x\"]\n";
        assert!(matches!(
            load_str(yaml),
            Err(TemplateError::MissingId { .. })
        ));
    }

    #[test]
    fn test_unknown_strategy_is_error() {
        let yaml = r#"
template_id: t
fields:
  f:
    find: "X"
    strategy: nearest_neighbour
"#;
        assert!(matches!(
            load_str(yaml),
            Err(TemplateError::UnknownStrategy { .. })
        ));
    }

    #[test]
    fn test_unknown_post_type_is_error() {
        let yaml = r#"
template_id: t
fields:
  f:
    find: "X"
    strategy: right_line
    post: "curency"
"#;
        assert!(matches!(
            load_str(yaml),
            Err(TemplateError::UnknownPostType { .. })
        ));
    }

    #[test]
    fn test_unknown_column_type_is_error() {
        let yaml = r#"
template_id: t
transactions:
  header:
    label: ["Date"]
  columns:
    - { name: amount, x1: 0, x2: 10, type: "moneyy" }
"#;
        assert!(matches!(
            load_str(yaml),
            Err(TemplateError::UnknownPostType { .. })
        ));
    }

    #[test]
    fn test_malformed_yaml_is_error() {
        assert!(matches!(
            load_str("template_id: [unclosed"),
            Err(TemplateError::Yaml { .. })
        ));
    }

    #[test]
    fn test_box_defaults_applied() {
        let yaml = r#"
template_id: t
fields:
  f:
    find: "X"
"#;
        let template = load_str(yaml).unwrap();
        assert_eq!(
            template.fields["f"].strategy,
            ExtractStrategy::Box {
                dx1: 0.0,
                dy1: 0.0,
                dx2: 100.0,
                dy2: 20.0
            }
        );
    }
}
