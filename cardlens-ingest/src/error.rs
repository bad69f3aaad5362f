//! Failure taxonomy for statement parsing.
//!
//! Unparsable individual values are not here: those recover locally inside
//! normalization. These are the failures a caller must see: either the
//! document cannot be parsed at all, or the extracted statement failed its
//! own invariants and cannot be trusted.

use thiserror::Error;

use crate::schema::ValidationError;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("document has no pages")]
    NoPages,

    #[error("required field `{0}` not found on page 1")]
    MissingField(&'static str),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Source(#[from] anyhow::Error),
}
