//! cardlens-ingest: template-driven credit-card statement extraction.
//!
//! Builds on the `cardlens-core` layout engine: loads declarative per-bank
//! templates, detects which one matches a document, and orchestrates field
//! and table extraction into a validated `Statement`.

pub mod detect;
pub mod error;
pub mod parser;
pub mod schema;
pub mod template;

pub use detect::{TemplateDetector, matches_template};
pub use error::ParseError;
pub use parser::{BOOTSTRAP_YEAR, StatementParser};
pub use schema::{
    Instalment, Meta, Rewards, RewardsByCard, Statement, Summary, Transaction, ValidationError,
};
pub use template::{
    InstalmentsSpec, PageMatch, PageRange, RewardsSpec, TemplateConfig, TemplateError,
    TransactionsSpec, load_template,
};
