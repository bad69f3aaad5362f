//! End-to-end parsing orchestration: fields, tables, assembly, validation.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Datelike;
use rust_decimal::Decimal;

use cardlens_core::{
    CellValue, DEFAULT_FUZZY_THRESHOLD, DEFAULT_ROW_GAP, Page, PageSource, PostProcess,
    TableEngine, TransactionTable, TxnRow, clean_merchant_name, extract_anchored_rows,
    extract_field, extract_fx_info, find_anchor, normalize_date, normalize_money,
    transaction_type,
};

use crate::error::ParseError;
use crate::schema::{Instalment, Meta, Rewards, RewardsByCard, Statement, Summary, Transaction};
use crate::template::{TemplateConfig, TransactionsSpec};

/// Provisional year for the first metadata pass, before the statement date
/// (and with it the real year) is known.
pub const BOOTSTRAP_YEAR: i32 = 2025;

/// Drives extraction of one document against one template.
pub struct StatementParser<'a> {
    template: &'a TemplateConfig,
    fallback: Option<&'a dyn TableEngine>,
}

impl<'a> StatementParser<'a> {
    pub fn new(template: &'a TemplateConfig) -> Self {
        Self {
            template,
            fallback: None,
        }
    }

    /// Enable the secondary table engine for pages where geometric extraction
    /// comes up empty.
    pub fn with_fallback(mut self, engine: &'a dyn TableEngine) -> Self {
        self.fallback = Some(engine);
        self
    }

    /// Parse the document at `path` into a validated [`Statement`].
    ///
    /// The caller receives either a fully validated record or a typed
    /// failure; there is no partial output.
    pub fn parse(&self, source: &dyn PageSource, path: &Path) -> Result<Statement, ParseError> {
        let pages = source.load_pages(path)?;
        if pages.is_empty() {
            return Err(ParseError::NoPages);
        }

        let meta = self.extract_meta(&pages[0])?;
        let statement_year = meta.statement_date.year();

        let summary = self.extract_summary(&pages[0], statement_year);
        let transactions = self.extract_transactions(&pages, statement_year, path);
        let instalments = self.extract_instalments(&pages, statement_year);
        let rewards = self.extract_rewards(&pages, statement_year);

        Ok(Statement::new(
            meta,
            summary,
            transactions,
            instalments,
            rewards,
        )?)
    }

    /// Metadata extraction is two-pass: year-less date fields need the
    /// statement year, which itself comes from the `statement_date` field.
    /// Pass one runs every field with the bootstrap year; once the statement
    /// date resolves, pass two re-extracts whatever is still missing with the
    /// real year.
    fn extract_meta(&self, page: &Page) -> Result<Meta, ParseError> {
        let mut values: BTreeMap<String, CellValue> = BTreeMap::new();

        for (name, spec) in &self.template.fields {
            if let Some(value) = extract_field(page, spec, BOOTSTRAP_YEAR) {
                values.insert(name.clone(), value);
            }
        }

        let resolved_year = values
            .get("statement_date")
            .and_then(|v| v.as_date())
            .map(|d| d.year());
        if let Some(year) = resolved_year {
            for (name, spec) in &self.template.fields {
                if !values.contains_key(name) {
                    if let Some(value) = extract_field(page, spec, year) {
                        values.insert(name.clone(), value);
                    }
                }
            }
        }

        let statement_date = values
            .get("statement_date")
            .and_then(|v| v.as_date())
            .ok_or(ParseError::MissingField("statement_date"))?;
        let payment_due_date = values
            .get("payment_due_date")
            .and_then(|v| v.as_date())
            .ok_or(ParseError::MissingField("payment_due_date"))?;

        Ok(Meta {
            bank: self.template.bank.clone(),
            template_id: self.template.template_id.clone(),
            statement_date,
            payment_due_date,
            card_masked: values
                .get("card_masked")
                .and_then(|v| v.as_text())
                .unwrap_or("")
                .to_string(),
            approved_credit_limit: money_cell(&values, "approved_credit_limit"),
            available_credit_limit: money_cell(&values, "available_credit_limit"),
            currency: self.template.currency.clone(),
        })
    }

    /// Summary fields come from page 1 with the resolved year; missing ones
    /// default to zero.
    fn extract_summary(&self, page: &Page, statement_year: i32) -> Summary {
        let money = |name: &str| {
            self.template
                .fields
                .get(name)
                .and_then(|spec| extract_field(page, spec, statement_year))
                .and_then(|v| v.as_money())
                .unwrap_or(Decimal::ZERO)
        };

        Summary {
            previous_balance: money("previous_balance"),
            payments: money("payments"),
            credits: money("credits"),
            purchases: money("purchases"),
            cash_advance: money("cash_advance"),
            charges: money("charges"),
            new_balance: money("new_balance"),
            minimum_payment_due: money("minimum_payment_due"),
        }
    }

    /// Walk transaction pages in order, honoring stop anchors. A stop anchor
    /// abandons extraction for its page and every later page.
    fn extract_transactions(
        &self,
        pages: &[Page],
        statement_year: i32,
        path: &Path,
    ) -> Vec<Transaction> {
        let Some(spec) = &self.template.transactions else {
            return Vec::new();
        };

        let mut all = Vec::new();
        for page in pages.iter().skip(spec.pages.start_after_page) {
            let stopped = spec
                .pages
                .stop_on_anchors
                .iter()
                .any(|anchor| find_anchor(&page.words, anchor, DEFAULT_FUZZY_THRESHOLD).is_some());
            if stopped {
                log::debug!(
                    "stop anchor found on page {}; ending transaction extraction",
                    page.number
                );
                break;
            }

            let table = TransactionTable::new(page, &spec.columns);
            let mut rows = table.extract(
                &spec.header,
                statement_year,
                spec.row_gap,
                spec.reference_prefix.as_deref(),
                &spec.fx_prefixes,
            );

            if rows.is_empty() {
                if let Some(engine) = self.fallback {
                    log::info!(
                        "no transactions on page {}; trying fallback table engine",
                        page.number
                    );
                    rows = self.fallback_rows(engine, path, page, spec, statement_year);
                }
            }

            all.extend(rows.into_iter().map(|row| self.transaction_from_row(row)));
        }
        all
    }

    fn transaction_from_row(&self, row: TxnRow) -> Transaction {
        Transaction {
            transaction_date: row.transaction_date,
            posting_date: row.posting_date,
            description: row.description,
            amount: row.amount,
            currency: self.template.currency.clone(),
            reference: row.reference,
            kind: row.kind,
            fx: row.fx,
        }
    }

    /// Map fallback-engine rows into the transaction shape with best-effort
    /// typing. The engine gets the real document path and the full page area.
    fn fallback_rows(
        &self,
        engine: &dyn TableEngine,
        path: &Path,
        page: &Page,
        spec: &TransactionsSpec,
        statement_year: i32,
    ) -> Vec<TxnRow> {
        let column_names: Vec<String> = spec.columns.iter().map(|c| c.name.clone()).collect();
        let area = (0.0, 0.0, page.width, page.height);
        let date_format = spec
            .columns
            .iter()
            .find(|c| c.name == "transaction_date")
            .and_then(|c| match &c.kind {
                PostProcess::Date(format) => Some(format.as_str()),
                _ => None,
            })
            .unwrap_or("%d %b");

        let mut rows = Vec::new();
        for raw in engine.extract_table(path, page.number, area, &column_names) {
            let Some(transaction_date) = raw
                .get("transaction_date")
                .and_then(|v| normalize_date(v, date_format, statement_year))
            else {
                continue;
            };
            let amount =
                normalize_money(raw.get("amount").map(String::as_str).unwrap_or(""), true);
            if amount.is_zero() {
                continue;
            }

            let raw_description = raw.get("description").cloned().unwrap_or_default();
            let posting_date = raw
                .get("posting_date")
                .and_then(|v| normalize_date(v, date_format, statement_year))
                .unwrap_or(transaction_date);
            let description = clean_merchant_name(&raw_description);
            let kind = transaction_type(&raw_description, amount);
            let fx = extract_fx_info(&description, &spec.fx_prefixes);

            rows.push(TxnRow {
                transaction_date,
                posting_date,
                description,
                amount,
                reference: raw
                    .get("reference")
                    .cloned()
                    .filter(|r| !r.trim().is_empty()),
                kind,
                fx,
            });
        }
        log::info!("fallback engine yielded {} rows", rows.len());
        rows
    }

    fn extract_instalments(&self, pages: &[Page], statement_year: i32) -> Vec<Instalment> {
        let Some(spec) = &self.template.instalments else {
            return Vec::new();
        };

        let mut instalments = Vec::new();
        for page in pages {
            for values in
                extract_anchored_rows(page, &spec.anchor, &spec.columns, statement_year, DEFAULT_ROW_GAP)
            {
                let Some(card_masked) = values.get("card_masked").and_then(|v| v.as_text()) else {
                    continue;
                };
                let Some(principal_amount) = values
                    .get("principal_amount")
                    .and_then(|v| v.as_money())
                    .filter(|amount| !amount.is_zero())
                else {
                    continue;
                };

                let (billed, total) = split_billed_total(
                    values
                        .get("billed_total")
                        .and_then(|v| v.as_text())
                        .unwrap_or(""),
                );

                instalments.push(Instalment {
                    card_masked: card_masked.to_string(),
                    merchant: values
                        .get("description")
                        .and_then(|v| v.as_text())
                        .unwrap_or("")
                        .to_string(),
                    billed,
                    total,
                    remaining_months: values
                        .get("remaining_months")
                        .and_then(|v| v.as_int())
                        .and_then(|v| u32::try_from(v).ok())
                        .unwrap_or(0),
                    principal_amount,
                    current_month_billed: money_cell(&values, "current_month_instalment"),
                    remaining_principal: money_cell(&values, "remaining_principal"),
                });
            }
        }
        instalments
    }

    fn extract_rewards(&self, pages: &[Page], statement_year: i32) -> Rewards {
        let Some(spec) = &self.template.rewards else {
            return Rewards::default();
        };

        // Summary point counters can sit on any page; first hit wins.
        let mut points: BTreeMap<&str, i64> = BTreeMap::new();
        for page in pages {
            for (name, field) in &spec.fields {
                if !points.contains_key(name.as_str()) {
                    if let Some(value) =
                        extract_field(page, field, statement_year).and_then(|v| v.as_int())
                    {
                        points.insert(name.as_str(), value);
                    }
                }
            }
        }

        let mut by_card = Vec::new();
        for page in pages {
            for values in extract_anchored_rows(
                page,
                &spec.anchor,
                &spec.by_card_columns,
                statement_year,
                DEFAULT_ROW_GAP,
            ) {
                let Some(card_masked) = values.get("card_masked").and_then(|v| v.as_text()) else {
                    continue;
                };
                let Some(expiry_date) = values.get("expiry_date").and_then(|v| v.as_date())
                else {
                    log::warn!("rewards row for {card_masked} has no expiry date; skipping");
                    continue;
                };

                by_card.push(RewardsByCard {
                    card_masked: card_masked.to_string(),
                    previous_balance: int_cell(&values, "previous_balance"),
                    earned: int_cell(&values, "earned"),
                    redeemed: int_cell(&values, "redeemed"),
                    adjustment: int_cell(&values, "adjustment"),
                    current_balance: int_cell(&values, "current_balance"),
                    expiry_date,
                });
            }
        }

        Rewards {
            total_awarded_in_statement: points.get("total_awarded_in_statement").copied().unwrap_or(0),
            total_points_brought_forward: points
                .get("total_points_brought_forward")
                .copied()
                .unwrap_or(0),
            points_used_or_expired: points.get("points_used_or_expired").copied().unwrap_or(0),
            points_adjustment: points.get("points_adjustment").copied().unwrap_or(0),
            total_points_available: points.get("total_points_available").copied().unwrap_or(0),
            by_card,
        }
    }
}

fn money_cell(values: &BTreeMap<String, CellValue>, name: &str) -> Decimal {
    values
        .get(name)
        .and_then(|v| v.as_money())
        .unwrap_or(Decimal::ZERO)
}

fn int_cell(values: &BTreeMap<String, CellValue>, name: &str) -> i64 {
    values.get(name).and_then(|v| v.as_int()).unwrap_or(0)
}

/// Split a "billed/total" counter like "04/06" into its two numbers.
fn split_billed_total(raw: &str) -> (u32, u32) {
    match raw.split_once('/') {
        Some((billed, total)) => (
            billed.trim().parse().unwrap_or(0),
            total.trim().parse().unwrap_or(0),
        ),
        None => (0, 0),
    }
}
