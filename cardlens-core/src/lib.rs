//! cardlens-core: layout-inference engine for positioned-text extraction.
//!
//! Bank-agnostic building blocks: a positioned token model, fuzzy anchor
//! matching, anchor-relative region extraction, value normalization, and
//! row/column table reconstruction. The statement-specific layer lives in
//! `cardlens-ingest`.

pub mod anchors;
pub mod normalize;
pub mod page;
pub mod tables;

pub use anchors::{
    AnchorMatch, DEFAULT_FUZZY_THRESHOLD, Direction, ExtractStrategy, FieldSpec, extract_box_region,
    extract_field, extract_right_line, find_anchor, find_anchors_in_page, find_nearest_word,
    partial_ratio,
};
pub use normalize::{
    CellValue, FxInfo, PostProcess, TxnKind, UnknownPostType, clean_merchant_name, extract_fx_info,
    normalize_date, normalize_float, normalize_int, normalize_money, normalize_text,
    transaction_type,
};
pub use page::{Page, PageSource, Word};
pub use tables::{
    ColumnSpec, DEFAULT_ROW_GAP, HeaderSpec, RowValues, TableEngine, TransactionTable, TxnRow,
    cluster_rows, extract_anchored_rows, row_values,
};
