//! Expression-based filtering for bucket archive data
//!
//! Expressions describe row predicates over the columns a bucket stores:
//! coordinates (Float64), timestamps (microseconds), measurement values
//! and string identifiers. They are evaluated against Arrow record
//! batches during reads and merges.

use std::collections::HashSet;

use arrow::array::{
    Array, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array, StringArray,
    TimestampMicrosecondArray,
};
use arrow::compute::{and, not, or};
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDateTime;

use crate::error::{BucketError, Result};
use crate::partition::Extent;

/// Represents a filter expression for querying bucket data
#[derive(Debug, Clone)]
pub enum Expr {
    /// Column equals a literal value
    Eq(String, LiteralValue),

    /// Column not equals a literal value
    NotEq(String, LiteralValue),

    /// Column is greater than a literal value
    Gt(String, LiteralValue),

    /// Column is greater than or equal to a literal value
    GtEq(String, LiteralValue),

    /// Column is less than a literal value
    Lt(String, LiteralValue),

    /// Column is less than or equal to a literal value
    LtEq(String, LiteralValue),

    /// Column is in a set of values
    In(String, Vec<LiteralValue>),

    /// Column is null
    IsNull(String),

    /// Column is not null
    IsNotNull(String),

    /// Logical AND of expressions
    And(Vec<Expr>),

    /// Logical OR of expressions
    Or(Vec<Expr>),

    /// Logical NOT of an expression
    Not(Box<Expr>),
}

/// Represents a literal value that can be used in filter expressions
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    /// Boolean value
    Boolean(bool),

    /// Integer value
    Int(i64),

    /// Floating point value
    Float(f64),

    /// String value
    String(String),

    /// Timestamp value (microseconds since epoch)
    Timestamp(i64),
}

impl LiteralValue {
    /// Build a timestamp literal from a naive datetime
    #[must_use]
    pub fn timestamp(t: NaiveDateTime) -> Self {
        Self::Timestamp(t.and_utc().timestamp_micros())
    }

    fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(v) | Self::Timestamp(v) => Some(v),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Float(v) => Some(v),
            Self::Int(v) => Some(v as f64),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl Expr {
    /// Half-open time window `start <= time < end` on the given column
    #[must_use]
    pub fn time_range(column: &str, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self::And(vec![
            Self::GtEq(column.to_string(), LiteralValue::timestamp(start)),
            Self::Lt(column.to_string(), LiteralValue::timestamp(end)),
        ])
    }

    /// Inclusive extent bounds on a pair of coordinate columns
    #[must_use]
    pub fn within_extent(x_column: &str, y_column: &str, extent: &Extent) -> Self {
        Self::And(vec![
            Self::GtEq(x_column.to_string(), LiteralValue::Float(extent.xmin)),
            Self::LtEq(x_column.to_string(), LiteralValue::Float(extent.xmax)),
            Self::GtEq(y_column.to_string(), LiteralValue::Float(extent.ymin)),
            Self::LtEq(y_column.to_string(), LiteralValue::Float(extent.ymax)),
        ])
    }

    /// Returns a set of all column names required by this expression
    #[must_use]
    pub fn required_columns(&self) -> HashSet<String> {
        let mut columns = HashSet::new();
        self.collect_required_columns(&mut columns);
        columns
    }

    fn collect_required_columns(&self, columns: &mut HashSet<String>) {
        match self {
            Self::Eq(col, _)
            | Self::NotEq(col, _)
            | Self::Gt(col, _)
            | Self::GtEq(col, _)
            | Self::Lt(col, _)
            | Self::LtEq(col, _)
            | Self::In(col, _)
            | Self::IsNull(col)
            | Self::IsNotNull(col) => {
                columns.insert(col.clone());
            }
            Self::And(exprs) | Self::Or(exprs) => {
                for expr in exprs {
                    expr.collect_required_columns(columns);
                }
            }
            Self::Not(expr) => {
                expr.collect_required_columns(columns);
            }
        }
    }
}

/// Comparison operators shared by the literal comparisons
#[derive(Debug, Clone, Copy)]
enum CmpOp {
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
}

impl CmpOp {
    fn apply<T: PartialOrd>(self, value: T, target: T) -> bool {
        match self {
            Self::Eq => value == target,
            Self::NotEq => value != target,
            Self::Gt => value > target,
            Self::GtEq => value >= target,
            Self::Lt => value < target,
            Self::LtEq => value <= target,
        }
    }
}

/// Evaluate an expression against a record batch, producing the row mask.
///
/// Null values never satisfy a comparison.
pub fn evaluate_expr(expr: &Expr, batch: &RecordBatch) -> Result<BooleanArray> {
    match expr {
        Expr::Eq(col, lit) => compare_column(batch, col, CmpOp::Eq, lit),
        Expr::NotEq(col, lit) => compare_column(batch, col, CmpOp::NotEq, lit),
        Expr::Gt(col, lit) => compare_column(batch, col, CmpOp::Gt, lit),
        Expr::GtEq(col, lit) => compare_column(batch, col, CmpOp::GtEq, lit),
        Expr::Lt(col, lit) => compare_column(batch, col, CmpOp::Lt, lit),
        Expr::LtEq(col, lit) => compare_column(batch, col, CmpOp::LtEq, lit),
        Expr::In(col, lits) => evaluate_in(batch, col, lits),
        Expr::IsNull(col) => {
            let array = column(batch, col)?;
            Ok((0..array.len()).map(|i| Some(array.is_null(i))).collect())
        }
        Expr::IsNotNull(col) => {
            let array = column(batch, col)?;
            Ok((0..array.len()).map(|i| Some(array.is_valid(i))).collect())
        }
        Expr::And(exprs) => {
            let mut mask: Option<BooleanArray> = None;
            for expr in exprs {
                let next = evaluate_expr(expr, batch)?;
                mask = Some(match mask {
                    Some(prev) => and(&prev, &next)?,
                    None => next,
                });
            }
            mask.ok_or_else(|| {
                BucketError::Partitioning("Empty AND expression".to_string())
            })
        }
        Expr::Or(exprs) => {
            let mut mask: Option<BooleanArray> = None;
            for expr in exprs {
                let next = evaluate_expr(expr, batch)?;
                mask = Some(match mask {
                    Some(prev) => or(&prev, &next)?,
                    None => next,
                });
            }
            mask.ok_or_else(|| BucketError::Partitioning("Empty OR expression".to_string()))
        }
        Expr::Not(expr) => {
            let mask = evaluate_expr(expr, batch)?;
            Ok(not(&mask)?)
        }
    }
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a dyn Array> {
    batch
        .column_by_name(name)
        .map(std::convert::AsRef::as_ref)
        .ok_or_else(|| {
            BucketError::Partitioning(format!("Column '{name}' not found in record batch"))
        })
}

fn unsupported(col: &str, data_type: &DataType) -> BucketError {
    BucketError::Partitioning(format!(
        "Unsupported column type {data_type} for filter on '{col}'"
    ))
}

fn literal_mismatch(col: &str, lit: &LiteralValue) -> BucketError {
    BucketError::Partitioning(format!(
        "Literal {lit:?} is incompatible with column '{col}'"
    ))
}

fn compare_column(
    batch: &RecordBatch,
    col: &str,
    op: CmpOp,
    lit: &LiteralValue,
) -> Result<BooleanArray> {
    let array = column(batch, col)?;
    match array.data_type() {
        DataType::Boolean => {
            let a = array.as_any().downcast_ref::<BooleanArray>().unwrap();
            let LiteralValue::Boolean(target) = *lit else {
                return Err(literal_mismatch(col, lit));
            };
            match op {
                CmpOp::Eq | CmpOp::NotEq => Ok((0..a.len())
                    .map(|i| Some(a.is_valid(i) && op.apply(a.value(i), target)))
                    .collect()),
                _ => Err(unsupported(col, array.data_type())),
            }
        }
        DataType::Int32 => {
            let a = array.as_any().downcast_ref::<Int32Array>().unwrap();
            let target = lit.as_i64().ok_or_else(|| literal_mismatch(col, lit))?;
            Ok((0..a.len())
                .map(|i| Some(a.is_valid(i) && op.apply(i64::from(a.value(i)), target)))
                .collect())
        }
        DataType::Int64 => {
            let a = array.as_any().downcast_ref::<Int64Array>().unwrap();
            let target = lit.as_i64().ok_or_else(|| literal_mismatch(col, lit))?;
            Ok((0..a.len())
                .map(|i| Some(a.is_valid(i) && op.apply(a.value(i), target)))
                .collect())
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            let a = array
                .as_any()
                .downcast_ref::<TimestampMicrosecondArray>()
                .unwrap();
            let target = lit.as_i64().ok_or_else(|| literal_mismatch(col, lit))?;
            Ok((0..a.len())
                .map(|i| Some(a.is_valid(i) && op.apply(a.value(i), target)))
                .collect())
        }
        DataType::Float32 => {
            let a = array.as_any().downcast_ref::<Float32Array>().unwrap();
            let target = lit.as_f64().ok_or_else(|| literal_mismatch(col, lit))?;
            Ok((0..a.len())
                .map(|i| Some(a.is_valid(i) && op.apply(f64::from(a.value(i)), target)))
                .collect())
        }
        DataType::Float64 => {
            let a = array.as_any().downcast_ref::<Float64Array>().unwrap();
            let target = lit.as_f64().ok_or_else(|| literal_mismatch(col, lit))?;
            Ok((0..a.len())
                .map(|i| Some(a.is_valid(i) && op.apply(a.value(i), target)))
                .collect())
        }
        DataType::Utf8 => {
            let a = array.as_any().downcast_ref::<StringArray>().unwrap();
            let target = lit.as_str().ok_or_else(|| literal_mismatch(col, lit))?;
            Ok((0..a.len())
                .map(|i| Some(a.is_valid(i) && op.apply(a.value(i), target)))
                .collect())
        }
        other => Err(unsupported(col, other)),
    }
}

fn evaluate_in(batch: &RecordBatch, col: &str, lits: &[LiteralValue]) -> Result<BooleanArray> {
    let array = column(batch, col)?;
    match array.data_type() {
        DataType::Utf8 => {
            let a = array.as_any().downcast_ref::<StringArray>().unwrap();
            let targets: HashSet<&str> = lits.iter().filter_map(LiteralValue::as_str).collect();
            Ok((0..a.len())
                .map(|i| Some(a.is_valid(i) && targets.contains(a.value(i))))
                .collect())
        }
        DataType::Int32 => {
            let a = array.as_any().downcast_ref::<Int32Array>().unwrap();
            let targets: HashSet<i64> = lits.iter().filter_map(LiteralValue::as_i64).collect();
            Ok((0..a.len())
                .map(|i| Some(a.is_valid(i) && targets.contains(&i64::from(a.value(i)))))
                .collect())
        }
        DataType::Int64 => {
            let a = array.as_any().downcast_ref::<Int64Array>().unwrap();
            let targets: HashSet<i64> = lits.iter().filter_map(LiteralValue::as_i64).collect();
            Ok((0..a.len())
                .map(|i| Some(a.is_valid(i) && targets.contains(&a.value(i))))
                .collect())
        }
        other => Err(unsupported(col, other)),
    }
}
