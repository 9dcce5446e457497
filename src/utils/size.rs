//! Human-readable size specifications for Parquet row groups and files.
//!
//! Row group and file limits are expressed either as an explicit number of
//! rows or as a byte target such as `"500MB"`. Byte targets are converted
//! to row counts from the in-memory footprint of the batch being written.

use std::str::FromStr;

use arrow::record_batch::RecordBatch;

use crate::error::{BucketError, Result};

/// A size limit, either in rows or as a byte target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSpec {
    /// Explicit maximum number of rows
    Rows(usize),
    /// Byte target, converted to rows per batch
    Bytes(u64),
}

impl SizeSpec {
    /// Estimate the row count equivalent of this size for a given batch.
    ///
    /// Byte targets are scaled by the batch's average in-memory bytes per
    /// row. The result is never zero.
    #[must_use]
    pub fn rows_for_batch(&self, batch: &RecordBatch) -> usize {
        match *self {
            Self::Rows(rows) => rows.max(1),
            Self::Bytes(bytes) => {
                if batch.num_rows() == 0 {
                    return 1;
                }
                let bytes_per_row =
                    (batch.get_array_memory_size() as f64 / batch.num_rows() as f64).max(1.0);
                ((bytes as f64 / bytes_per_row) as usize).max(1)
            }
        }
    }
}

impl FromStr for SizeSpec {
    type Err = BucketError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Ok(rows) = trimmed.parse::<usize>() {
            return Ok(Self::Rows(rows));
        }
        parse_bytes(trimmed).map(Self::Bytes)
    }
}

/// Parse a human byte size such as `"500MB"`, `"2 GB"` or `"1024"`.
pub fn parse_bytes(s: &str) -> Result<u64> {
    let trimmed = s.trim();
    let split = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| BucketError::Partitioning(format!("Invalid size specification '{s}'")))?;
    if value < 0.0 {
        return Err(BucketError::Partitioning(format!(
            "Size specification '{s}' must be non-negative"
        )));
    }
    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "KB" => 1 << 10,
        "MB" => 1 << 20,
        "GB" => 1 << 30,
        "TB" => 1 << 40,
        other => {
            return Err(BucketError::Partitioning(format!(
                "Unknown size unit '{other}' in '{s}'"
            )));
        }
    };
    Ok((value * multiplier as f64) as u64)
}
