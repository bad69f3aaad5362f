//! Normalization of raw extracted strings into typed values.
//!
//! Unparsable money/int/float values recover to zero and unparsable dates to
//! `None`, with a warning logged; partial extraction beats aborting a whole
//! statement for one bad cell.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use chrono::format::{Parsed, StrftimeItems};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static NUMERIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").unwrap());
static UNSIGNED_NUMERIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());
static CR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)CR").unwrap());

/// Suffix patterns stripped from merchant names, applied in order.
static MERCHANT_SUFFIX_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i) SINGAPORE SG",
        r"(?i) SINGAPORE",
        r"(?i) SG",
        r"(?i) Transaction Ref",
        r"(?i)#\d+/\d+~~",
        r"(?i)\d+/\d+~~",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Date formats tried, in order, when the primary format fails.
const FALLBACK_DATE_FORMATS: [&str; 6] = [
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%Y-%m-%d",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d %B %Y",
];

/// Parse a money string into a `Decimal`.
///
/// Commas and whitespace are stripped, a "CR" marker is detected and removed,
/// and a fully parenthesized value is negative. A CR-marked value is negative
/// only when `negative_if_cr` is set. Unparsable input yields zero.
pub fn normalize_money(value: &str, negative_if_cr: bool) -> Decimal {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Decimal::ZERO;
    }

    let cleaned: String = trimmed.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();

    let is_credit = cleaned.to_uppercase().contains("CR");
    let cleaned = if is_credit {
        CR_RE.replace_all(&cleaned, "").into_owned()
    } else {
        cleaned
    };

    let is_negative = cleaned.starts_with('(') && cleaned.ends_with(')');
    let cleaned = if is_negative {
        cleaned[1..cleaned.len() - 1].to_string()
    } else {
        cleaned
    };

    let Some(m) = NUMERIC_RE.find(&cleaned) else {
        log::warn!("could not extract numeric value from: {value}");
        return Decimal::ZERO;
    };
    let Ok(amount) = Decimal::from_str(m.as_str()) else {
        log::warn!("could not parse numeric value from: {value}");
        return Decimal::ZERO;
    };

    if is_negative || (is_credit && negative_if_cr) {
        -amount.abs()
    } else {
        amount
    }
}

fn parse_date_with_format(value: &str, format: &str, statement_year: i32) -> Option<NaiveDate> {
    let has_year = format.contains("%Y") || format.contains("%y");
    if has_year {
        return NaiveDate::parse_from_str(value, format).ok();
    }

    // Year-less formats borrow the statement year.
    let mut parsed = Parsed::new();
    chrono::format::parse(&mut parsed, value, StrftimeItems::new(format)).ok()?;
    parsed.set_year(i64::from(statement_year)).ok()?;
    parsed.to_naive_date().ok()
}

/// Parse a date string, trying `format` first and then a fixed list of
/// common fallbacks. Formats without a year component use `statement_year`.
/// Returns `None` when nothing parses.
pub fn normalize_date(value: &str, format: &str, statement_year: i32) -> Option<NaiveDate> {
    let cleaned = value.trim();
    if cleaned.is_empty() {
        return None;
    }

    if let Some(date) = parse_date_with_format(cleaned, format, statement_year) {
        return Some(date);
    }

    for alt in FALLBACK_DATE_FORMATS {
        if let Some(date) = parse_date_with_format(cleaned, alt, statement_year) {
            return Some(date);
        }
    }

    log::warn!("could not parse date: {value}");
    None
}

/// Collapse runs of whitespace and trim.
pub fn normalize_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse an integer, stripping commas and whitespace. Failure yields zero.
pub fn normalize_int(value: &str) -> i64 {
    let cleaned: String = value.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return 0;
    }
    cleaned.parse().unwrap_or_else(|_| {
        log::warn!("could not parse integer: {value}");
        0
    })
}

/// Parse a float, stripping commas and whitespace. Failure yields zero.
pub fn normalize_float(value: &str) -> f64 {
    let cleaned: String = value.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return 0.0;
    }
    cleaned.parse().unwrap_or_else(|_| {
        log::warn!("could not parse float: {value}");
        0.0
    })
}

/// Template spelling of a post-processing kind was not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown post-processing type: {0}")]
pub struct UnknownPostType(pub String);

/// How a raw extracted string is turned into a typed value.
///
/// Parsed from template spellings at load time; an unknown spelling is a
/// load error rather than a silent fallback to trimmed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PostProcess {
    Trim,
    Money,
    MoneyNegIfCr,
    Int,
    Float,
    Date(String),
}

impl PostProcess {
    /// Parse a template spelling: `trim`, `money`, `money_neg_if_cr`,
    /// `money:paren_or_cr` (alias), `int`, `float`, `date:<format>`.
    pub fn parse(spec: &str) -> Result<Self, UnknownPostType> {
        match spec {
            "trim" => Ok(Self::Trim),
            "money" => Ok(Self::Money),
            "money_neg_if_cr" | "money:paren_or_cr" => Ok(Self::MoneyNegIfCr),
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            _ => match spec.strip_prefix("date:") {
                Some(format) if !format.is_empty() => Ok(Self::Date(format.to_string())),
                _ => Err(UnknownPostType(spec.to_string())),
            },
        }
    }

    /// Apply the normalization to a raw string. Returns `None` for empty
    /// input or an unparsable date; numeric kinds recover to zero instead.
    pub fn apply(&self, raw: &str, statement_year: i32) -> Option<CellValue> {
        if raw.trim().is_empty() {
            return None;
        }
        Some(match self {
            Self::Trim => CellValue::Text(normalize_text(raw)),
            Self::Money => CellValue::Money(normalize_money(raw, false)),
            Self::MoneyNegIfCr => CellValue::Money(normalize_money(raw, true)),
            Self::Int => CellValue::Int(normalize_int(raw)),
            Self::Float => CellValue::Float(normalize_float(raw)),
            Self::Date(format) => CellValue::Date(normalize_date(raw, format, statement_year)?),
        })
    }
}

/// A typed table/field cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Money(Decimal),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
}

impl CellValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_money(&self) -> Option<Decimal> {
        match self {
            Self::Money(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }
}

/// Foreign-currency information embedded in a transaction description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxInfo {
    pub currency: String,
    pub original_amount: Decimal,
}

/// Extract foreign-exchange information from a description that starts with
/// one of the configured currency prefixes (e.g. "USD ").
pub fn extract_fx_info(description: &str, fx_prefixes: &[String]) -> Option<FxInfo> {
    for prefix in fx_prefixes {
        if description.len() >= prefix.len()
            && description.is_char_boundary(prefix.len())
            && description[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            let remaining = description[prefix.len()..].trim();
            if let Some(m) = UNSIGNED_NUMERIC_RE.find(remaining) {
                if let Ok(amount) = Decimal::from_str(m.as_str()) {
                    return Some(FxInfo {
                        currency: prefix.trim().to_string(),
                        original_amount: amount,
                    });
                }
            }
        }
    }
    None
}

/// Transaction classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnKind {
    #[serde(rename = "purchase")]
    Purchase,
    #[serde(rename = "payment")]
    Payment,
}

const PAYMENT_KEYWORDS: [&str; 4] = ["PAYMENT", "CREDIT", "REFUND", "REVERSAL"];

/// Classify a transaction. Description keywords take priority over sign;
/// otherwise a negative amount is a payment.
pub fn transaction_type(description: &str, amount: Decimal) -> TxnKind {
    let upper = description.to_uppercase();
    for keyword in PAYMENT_KEYWORDS {
        if upper.contains(keyword) {
            return TxnKind::Payment;
        }
    }
    if amount < Decimal::ZERO {
        TxnKind::Payment
    } else {
        TxnKind::Purchase
    }
}

/// Strip known location/reference suffixes from a merchant name and collapse
/// whitespace.
pub fn clean_merchant_name(merchant: &str) -> String {
    let mut cleaned = merchant.to_string();
    for re in MERCHANT_SUFFIX_RES.iter() {
        cleaned = re.replace_all(&cleaned, "").into_owned();
    }
    normalize_text(&cleaned)
}
