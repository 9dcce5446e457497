//! Synthetic granules for tests and benchmarks.
//!
//! Generates orbit-like swath data: a ground track advancing in
//! longitude, a handful of cross-track positions per footprint, one
//! footprint per second and a seeded random measurement value. The
//! companion filename generator produces names the default test patterns
//! parse back, so whole pipelines can run without real satellite data.

use std::path::Path;
use std::sync::Arc;

use arrow::array::TimestampMicrosecondArray;
use arrow::datatypes::{DataType, Field, FieldRef, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{NaiveDateTime, TimeDelta};
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::error::Result;
use crate::pattern::FilenamePattern;
use crate::routines::GranuleReader;

/// One synthetic swath footprint
#[derive(Debug, Clone, Serialize)]
struct ObservationRow {
    lon: f64,
    lat: f64,
    cross_track_id: i32,
    value: f64,
}

fn observation_fields() -> Vec<FieldRef> {
    vec![
        Arc::new(Field::new("lon", DataType::Float64, false)),
        Arc::new(Field::new("lat", DataType::Float64, false)),
        Arc::new(Field::new("cross_track_id", DataType::Int32, false)),
        Arc::new(Field::new("value", DataType::Float64, false)),
    ]
}

fn wrap_lon(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 { 180.0 - 1e-9 } else { wrapped }
}

/// Generate one synthetic granule as a record batch.
///
/// The track starts at `(lon0, lat0)` and advances 0.05 degrees per
/// second, wrapping at the antimeridian; each footprint has `n_cross`
/// cross-track positions 0.02 degrees apart. Timestamps cover
/// `[start, end)` at one footprint per second.
pub fn synthetic_granule(
    start: NaiveDateTime,
    end: NaiveDateTime,
    lon0: f64,
    lat0: f64,
    n_cross: usize,
    seed: u64,
) -> Result<RecordBatch> {
    let seconds = (end - start).num_seconds().max(1) as usize;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut rows = Vec::with_capacity(seconds * n_cross);
    let mut times = Vec::with_capacity(seconds * n_cross);
    for step in 0..seconds {
        let lon = wrap_lon(lon0 + 0.05 * step as f64);
        let t = (start + TimeDelta::seconds(step as i64))
            .and_utc()
            .timestamp_micros();
        for cross in 0..n_cross {
            rows.push(ObservationRow {
                lon,
                lat: (lat0 + 0.02 * cross as f64).clamp(-90.0, 90.0),
                cross_track_id: cross as i32,
                value: rng.random_range(0.0..1.0),
            });
            times.push(t);
        }
    }

    let fields = observation_fields();
    let batch = serde_arrow::to_record_batch(&fields, &rows)
        .map_err(|e| anyhow::anyhow!("Failed to serialize synthetic rows: {e}"))?;

    let mut columns = batch.columns().to_vec();
    columns.push(Arc::new(TimestampMicrosecondArray::from(times)));
    let mut schema_fields = batch.schema().fields().iter().cloned().collect_vec();
    schema_fields.push(Arc::new(Field::new(
        "time",
        DataType::Timestamp(TimeUnit::Microsecond, None),
        false,
    )));
    Ok(RecordBatch::try_new(
        Arc::new(Schema::new(schema_fields)),
        columns,
    )?)
}

/// Filename for a synthetic granule, parseable by [`test_patterns`]
#[must_use]
pub fn granule_filename(
    product: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
    granule_id: u64,
) -> String {
    format!(
        "{product}.{}-E{}.{granule_id:06}.DAT",
        start.format("%Y%m%d-S%H%M%S"),
        end.format("%H%M%S")
    )
}

/// Patterns matching [`granule_filename`] output
#[must_use]
pub fn test_patterns() -> Vec<FilenamePattern> {
    vec![
        FilenamePattern::new(
            "{product:s}.{start_date:%Y%m%d}-S{start_time:%H%M%S}-E{end_time:%H%M%S}.{granule_id}.{data_format}",
        )
        .expect("static pattern is valid"),
    ]
}

/// Granule reader producing synthetic data from the filename alone.
///
/// The granule's time interval comes from parsing the name with
/// [`test_patterns`]; the granule id seeds both the track origin and the
/// measurement values, so rereads are deterministic.
#[must_use]
pub fn synthetic_granule_reader(n_cross: usize) -> GranuleReader {
    let patterns = test_patterns();
    Arc::new(move |path: &Path| {
        let info = crate::pattern::info_from_path(path, &patterns)?;
        let seed = info
            .fields
            .get("granule_id")
            .and_then(|id| id.parse::<u64>().ok())
            .unwrap_or(0);
        let lon0 = wrap_lon(-180.0 + (seed as f64 * 37.0) % 360.0);
        let lat0 = -60.0 + (seed as f64 * 13.0) % 120.0;
        let batch = synthetic_granule(info.start_time, info.end_time, lon0, lat0, n_cross, seed)?;
        Ok(Some(vec![batch]))
    })
}
