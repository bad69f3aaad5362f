//! Typed statement records and construction-time validation.
//!
//! A `Statement` is the terminal artifact of a parse: assembled once,
//! validated at construction, never mutated afterward. The serialized field
//! names are a stable contract consumed by other systems.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cardlens_core::{FxInfo, TxnKind};

/// Statement metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub bank: String,
    pub template_id: String,
    pub statement_date: NaiveDate,
    pub payment_due_date: NaiveDate,
    pub card_masked: String,
    pub approved_credit_limit: Decimal,
    pub available_credit_limit: Decimal,
    pub currency: String,
}

/// Account summary. All amounts are signed; payments and credits are
/// typically negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub previous_balance: Decimal,
    pub payments: Decimal,
    pub credits: Decimal,
    pub purchases: Decimal,
    pub cash_advance: Decimal,
    pub charges: Decimal,
    pub new_balance: Decimal,
    pub minimum_payment_due: Decimal,
}

impl Summary {
    /// Left-hand side of the balance equation.
    pub fn computed_balance(&self) -> Decimal {
        self.previous_balance
            + self.payments
            + self.credits
            + self.purchases
            + self.cash_advance
            + self.charges
    }
}

/// Individual transaction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_date: NaiveDate,
    pub posting_date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(rename = "type")]
    pub kind: TxnKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fx: Option<FxInfo>,
}

/// Instalment plan information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instalment {
    pub card_masked: String,
    pub merchant: String,
    pub billed: u32,
    pub total: u32,
    pub remaining_months: u32,
    pub principal_amount: Decimal,
    pub current_month_billed: Decimal,
    pub remaining_principal: Decimal,
}

/// Rewards points for one card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardsByCard {
    pub card_masked: String,
    pub previous_balance: i64,
    pub earned: i64,
    pub redeemed: i64,
    pub adjustment: i64,
    pub current_balance: i64,
    pub expiry_date: NaiveDate,
}

/// Rewards points summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rewards {
    pub total_awarded_in_statement: i64,
    pub total_points_brought_forward: i64,
    pub points_used_or_expired: i64,
    pub points_adjustment: i64,
    pub total_points_available: i64,
    pub by_card: Vec<RewardsByCard>,
}

/// A cross-field invariant failed; the extraction cannot be trusted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("balance equation mismatch: {computed} != {new_balance} (difference: {difference})")]
    BalanceEquation {
        computed: Decimal,
        new_balance: Decimal,
        difference: Decimal,
    },

    #[error("transaction amount cannot be zero: {description}")]
    ZeroAmount { description: String },
}

/// Complete statement record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub meta: Meta,
    pub summary: Summary,
    pub transactions: Vec<Transaction>,
    pub instalments: Vec<Instalment>,
    pub rewards: Rewards,
}

impl Statement {
    /// Assemble a statement, running the cross-field validation. The summary
    /// must satisfy the balance equation within 0.01 currency units and no
    /// transaction may have a zero amount.
    pub fn new(
        meta: Meta,
        summary: Summary,
        transactions: Vec<Transaction>,
        instalments: Vec<Instalment>,
        rewards: Rewards,
    ) -> Result<Self, ValidationError> {
        let statement = Self {
            meta,
            summary,
            transactions,
            instalments,
            rewards,
        };
        statement.validate()?;
        Ok(statement)
    }

    /// Re-run the construction-time invariants. Deserialization bypasses
    /// [`Statement::new`], so consumers of untrusted JSON call this.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let computed = self.summary.computed_balance();
        let difference = (computed - self.summary.new_balance).abs();
        if difference > Decimal::new(1, 2) {
            return Err(ValidationError::BalanceEquation {
                computed,
                new_balance: self.summary.new_balance,
                difference,
            });
        }

        for txn in &self.transactions {
            if txn.amount.is_zero() {
                return Err(ValidationError::ZeroAmount {
                    description: txn.description.clone(),
                });
            }
        }

        Ok(())
    }
}
