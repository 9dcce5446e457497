//! Row-level filtering of Arrow record batches.
//!
//! Bucket queries push an expression down to every file read: a time
//! window on the `time` column, extent bounds on the coordinate columns,
//! and any additional user expression.

pub mod expr;

use std::collections::HashSet;

use anyhow::Context;
use arrow::array::{ArrayRef, BooleanArray};
use arrow::compute::filter as arrow_filter;
use arrow::record_batch::RecordBatch;

use crate::error::Result;

pub use expr::{Expr, LiteralValue, evaluate_expr};

/// Filter a record batch based on a boolean mask
///
/// Returns a new record batch with only rows where the mask is true.
pub fn filter_record_batch(batch: &RecordBatch, mask: &BooleanArray) -> Result<RecordBatch> {
    if batch.num_rows() != mask.len() {
        return Err(anyhow::anyhow!(
            "Mask length ({}) doesn't match batch row count ({})",
            mask.len(),
            batch.num_rows()
        )
        .into());
    }

    let filtered_columns: Vec<ArrayRef> = batch
        .columns()
        .iter()
        .map(|col| arrow_filter(col, mask))
        .collect::<arrow::error::Result<_>>()
        .with_context(|| "Failed to apply boolean filter to columns")?;

    RecordBatch::try_new(batch.schema(), filtered_columns)
        .with_context(|| "Failed to create filtered record batch")
        .map_err(Into::into)
}

/// Trait for objects that can filter record batches
pub trait BatchFilter: std::fmt::Debug + Send + Sync {
    /// Filter a record batch
    fn filter(&self, batch: &RecordBatch) -> Result<RecordBatch>;

    /// Returns the set of column names required by this filter
    fn required_columns(&self) -> HashSet<String>;
}

/// A filter that evaluates an expression against a record batch
#[derive(Debug, Clone)]
pub struct ExpressionFilter {
    expr: Expr,
}

impl ExpressionFilter {
    /// Create a new expression filter
    #[must_use]
    pub const fn new(expr: Expr) -> Self {
        Self { expr }
    }

    /// The wrapped expression
    #[must_use]
    pub const fn expr(&self) -> &Expr {
        &self.expr
    }
}

impl BatchFilter for ExpressionFilter {
    fn filter(&self, batch: &RecordBatch) -> Result<RecordBatch> {
        let mask = evaluate_expr(&self.expr, batch)?;
        filter_record_batch(batch, &mask)
    }

    fn required_columns(&self) -> HashSet<String> {
        self.expr.required_columns()
    }
}
