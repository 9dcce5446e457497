//! Granule filename parsing.
//!
//! Granule archives encode acquisition times in file names. A
//! `FilenamePattern` is a template with `{name}` or `{name:spec}` fields,
//! where a spec containing `%` is a chrono strftime format and anything
//! else matches free text up to the next literal:
//!
//! ```text
//! {level:s}.{satellite:s}.{sensor:s}.{algorithm:s}.{start_time:%Y%m%d-S%H%M%S}-E{end_time:%H%M%S}.{granule_id}.{version}.{data_format}
//! ```
//!
//! Parsing resolves the granule `start_time`/`end_time` from the captured
//! date and time fields, rolling a time-only end over midnight when it
//! precedes the start, and defaulting a missing end to two hours after
//! the start (a conservative upper bound on orbit granule duration).

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use rustc_hash::FxHashMap;

use crate::error::{BucketError, Result};

/// Default granule duration when the filename has no end time
const DEFAULT_GRANULE_DURATION_HOURS: i64 = 2;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field { name: String, spec: FieldSpec },
}

#[derive(Debug, Clone, PartialEq)]
enum FieldSpec {
    /// Free text up to the next literal (or end of input)
    Text,
    /// Fixed-width strftime value
    Datetime {
        format: String,
        width: usize,
        has_date: bool,
        has_time: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum ParsedValue {
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    Text(String),
}

/// Information extracted from a granule filename
#[derive(Debug, Clone, PartialEq)]
pub struct GranuleInfo {
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    /// Remaining fields, as raw text
    pub fields: FxHashMap<String, String>,
}

/// A compiled filename template
#[derive(Debug, Clone, PartialEq)]
pub struct FilenamePattern {
    template: String,
    segments: Vec<Segment>,
}

impl FilenamePattern {
    /// Compile a template.
    ///
    /// Fails on unbalanced braces, empty field names, or strftime
    /// directives without a fixed width.
    pub fn new(template: &str) -> Result<Self> {
        let segments = compile_template(template)?;
        Ok(Self {
            template: template.to_string(),
            segments,
        })
    }

    /// The original template string
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Parse a filename and resolve its granule times
    pub fn parse(&self, filename: &str) -> Result<GranuleInfo> {
        let values = self.match_segments(filename)?;
        resolve_times(filename, values)
    }

    fn match_segments(&self, filename: &str) -> Result<FxHashMap<String, ParsedValue>> {
        let mut values = FxHashMap::default();
        let mut rest = filename;
        let mut iter = self.segments.iter().peekable();
        while let Some(segment) = iter.next() {
            match segment {
                Segment::Literal(lit) => {
                    rest = rest.strip_prefix(lit.as_str()).ok_or_else(|| {
                        pattern_error(filename, &self.template, "literal mismatch")
                    })?;
                }
                Segment::Field { name, spec } => match spec {
                    FieldSpec::Datetime {
                        format,
                        width,
                        has_date,
                        has_time,
                    } => {
                        let raw = rest.get(..*width).ok_or_else(|| {
                            pattern_error(filename, &self.template, "input too short")
                        })?;
                        let value = parse_datetime_field(raw, format, *has_date, *has_time)
                            .map_err(|e| {
                                pattern_error(filename, &self.template, &e.to_string())
                            })?;
                        values.insert(name.clone(), value);
                        rest = &rest[*width..];
                    }
                    FieldSpec::Text => {
                        let value = match iter.peek() {
                            Some(Segment::Literal(lit)) => {
                                let idx = rest.find(lit.as_str()).ok_or_else(|| {
                                    pattern_error(filename, &self.template, "literal mismatch")
                                })?;
                                let (value, remainder) = rest.split_at(idx);
                                rest = remainder;
                                value
                            }
                            Some(Segment::Field { .. }) => {
                                return Err(BucketError::Pattern(format!(
                                    "Pattern '{}' has adjacent free-text fields",
                                    self.template
                                )));
                            }
                            None => {
                                let value = rest;
                                rest = "";
                                value
                            }
                        };
                        if value.is_empty() {
                            return Err(pattern_error(
                                filename,
                                &self.template,
                                &format!("empty value for field '{name}'"),
                            ));
                        }
                        values.insert(name.clone(), ParsedValue::Text(value.to_string()));
                    }
                },
            }
        }
        if !rest.is_empty() {
            return Err(pattern_error(filename, &self.template, "trailing input"));
        }
        Ok(values)
    }
}

fn pattern_error(filename: &str, template: &str, reason: &str) -> BucketError {
    BucketError::Pattern(format!(
        "Filename '{filename}' does not match pattern '{template}': {reason}"
    ))
}

fn compile_template(template: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    literal.push('{');
                    continue;
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                let mut body = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    body.push(c);
                }
                if !closed {
                    return Err(BucketError::Pattern(format!(
                        "Unbalanced braces in pattern '{template}'"
                    )));
                }
                let (name, spec) = match body.split_once(':') {
                    Some((name, spec)) => (name, Some(spec)),
                    None => (body.as_str(), None),
                };
                if name.is_empty() {
                    return Err(BucketError::Pattern(format!(
                        "Empty field name in pattern '{template}'"
                    )));
                }
                let spec = match spec {
                    Some(spec) if spec.contains('%') => {
                        let (width, has_date, has_time) = analyze_strftime(spec)?;
                        FieldSpec::Datetime {
                            format: spec.to_string(),
                            width,
                            has_date,
                            has_time,
                        }
                    }
                    _ => FieldSpec::Text,
                };
                segments.push(Segment::Field {
                    name: name.to_string(),
                    spec,
                });
            }
            '}' => {
                if chars.peek() == Some(&'}') {
                    chars.next();
                    literal.push('}');
                } else {
                    return Err(BucketError::Pattern(format!(
                        "Unbalanced braces in pattern '{template}'"
                    )));
                }
            }
            other => literal.push(other),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Character width and date/time classification of a strftime format.
///
/// Only fixed-width directives are supported, which is what granule
/// naming conventions use in practice.
fn analyze_strftime(format: &str) -> Result<(usize, bool, bool)> {
    let mut width = 0;
    let mut has_date = false;
    let mut has_time = false;
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            width += c.len_utf8();
            continue;
        }
        let directive = chars.next().ok_or_else(|| {
            BucketError::Pattern(format!("Dangling '%' in strftime format '{format}'"))
        })?;
        match directive {
            'Y' => {
                width += 4;
                has_date = true;
            }
            'y' | 'm' | 'd' => {
                width += 2;
                has_date = true;
            }
            'j' => {
                width += 3;
                has_date = true;
            }
            'H' | 'M' | 'S' => {
                width += 2;
                has_time = true;
            }
            '%' => width += 1,
            other => {
                return Err(BucketError::Pattern(format!(
                    "Unsupported strftime directive '%{other}' in '{format}'"
                )));
            }
        }
    }
    if !has_date && !has_time {
        return Err(BucketError::Pattern(format!(
            "strftime format '{format}' captures neither date nor time"
        )));
    }
    Ok((width, has_date, has_time))
}

fn parse_datetime_field(
    raw: &str,
    format: &str,
    has_date: bool,
    has_time: bool,
) -> Result<ParsedValue> {
    let value = match (has_date, has_time) {
        (true, true) => ParsedValue::DateTime(
            NaiveDateTime::parse_from_str(raw, format)
                .map_err(|e| BucketError::Pattern(format!("'{raw}' ({format}): {e}")))?,
        ),
        (true, false) => ParsedValue::Date(
            NaiveDate::parse_from_str(raw, format)
                .map_err(|e| BucketError::Pattern(format!("'{raw}' ({format}): {e}")))?,
        ),
        (false, true) => ParsedValue::Time(
            NaiveTime::parse_from_str(raw, format)
                .map_err(|e| BucketError::Pattern(format!("'{raw}' ({format}): {e}")))?,
        ),
        (false, false) => unreachable!("rejected at compile time"),
    };
    Ok(value)
}

/// Resolve start and end datetimes from the captured fields.
fn resolve_times(
    filename: &str,
    mut values: FxHashMap<String, ParsedValue>,
) -> Result<GranuleInfo> {
    let start_time = values.remove("start_time");
    let start_date = values.remove("start_date");
    let end_time = values.remove("end_time");
    let end_date = values.remove("end_date");

    let start = match start_time {
        Some(ParsedValue::DateTime(dt)) => dt,
        Some(ParsedValue::Time(t)) => match start_date {
            Some(ParsedValue::Date(d)) => d.and_time(t),
            _ => {
                return Err(BucketError::Pattern(format!(
                    "{filename}: start_time is a time object but start_date is missing or invalid"
                )));
            }
        },
        _ => {
            return Err(BucketError::Pattern(format!(
                "{filename}: invalid or missing start_time"
            )));
        }
    };

    let end = match end_time {
        Some(ParsedValue::DateTime(dt)) => dt,
        Some(ParsedValue::Time(t)) => {
            let base_date = match end_date {
                Some(ParsedValue::Date(d)) => d,
                _ => start.date(),
            };
            let mut end = base_date.and_time(t);
            if end < start {
                // Time-only end earlier than the start wraps past midnight
                end += TimeDelta::days(1);
            }
            end
        }
        Some(other) => {
            return Err(BucketError::Pattern(format!(
                "{filename}: invalid end_time field {other:?}"
            )));
        }
        None => start + TimeDelta::hours(DEFAULT_GRANULE_DURATION_HOURS),
    };

    let fields = values
        .into_iter()
        .map(|(name, value)| {
            let text = match value {
                ParsedValue::Text(s) => s,
                ParsedValue::DateTime(dt) => dt.to_string(),
                ParsedValue::Date(d) => d.to_string(),
                ParsedValue::Time(t) => t.to_string(),
            };
            (name, text)
        })
        .collect();

    Ok(GranuleInfo {
        start_time: start,
        end_time: end,
        fields,
    })
}

/// Parse a filename with the first matching pattern.
pub fn parse_any(filename: &str, patterns: &[FilenamePattern]) -> Result<GranuleInfo> {
    for pattern in patterns {
        if let Ok(info) = pattern.parse(filename) {
            return Ok(info);
        }
    }
    Err(BucketError::Pattern(format!(
        "Filename '{filename}' does not match any of the {} configured patterns",
        patterns.len()
    )))
}

/// Granule info from a file path (the basename is matched).
pub fn info_from_path(path: &Path, patterns: &[FilenamePattern]) -> Result<GranuleInfo> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| BucketError::Pattern(format!("Invalid path {}", path.display())))?;
    parse_any(filename, patterns)
}

/// Start and end times of each granule path.
pub fn start_end_times(
    paths: &[PathBuf],
    patterns: &[FilenamePattern],
) -> Result<Vec<(NaiveDateTime, NaiveDateTime)>> {
    paths
        .iter()
        .map(|path| info_from_path(path, patterns).map(|info| (info.start_time, info.end_time)))
        .collect()
}

/// Keep the paths whose granule interval intersects `[start, end)`.
pub fn filter_paths_by_time(
    paths: Vec<PathBuf>,
    patterns: &[FilenamePattern],
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<PathBuf>> {
    let mut kept = Vec::with_capacity(paths.len());
    for path in paths {
        let info = info_from_path(&path, patterns)?;
        if info.start_time < end && info.end_time >= start {
            kept.push(path);
        }
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn full_datetime_start_and_end() {
        let pattern = FilenamePattern::new("{start_time:%Y%m%dT%H%M%S}-{end_time:%Y%m%dT%H%M%S}")
            .unwrap();
        let info = pattern.parse("20240501T120000-20240501T123000").unwrap();
        assert_eq!(info.start_time, dt(2024, 5, 1, 12, 0, 0));
        assert_eq!(info.end_time, dt(2024, 5, 1, 12, 30, 0));
    }

    #[test]
    fn modis_l1b_granule() {
        let pattern = FilenamePattern::new(
            "{product:s}.A{start_time:%Y%j.%H%M}.{others:s}.{processing_time:s}.{data_format}",
        )
        .unwrap();
        let info = pattern
            .parse("MOD021KM.A2018358.1010.061.2018358192717.hdf")
            .unwrap();
        assert_eq!(info.start_time, dt(2018, 12, 24, 10, 10, 0));
        // No end time in the name: default granule duration applies
        assert_eq!(info.end_time, dt(2018, 12, 24, 12, 10, 0));
        assert_eq!(info.fields.get("product").unwrap(), "MOD021KM");
        assert_eq!(info.fields.get("data_format").unwrap(), "hdf");
    }

    #[test]
    fn gpm_rs_granule() {
        let filename = "2A.GPM.DPR.V9-20211125.20210705-S013942-E031214.041760.V07A.HDF5";

        let pattern = FilenamePattern::new(
            "{product_level:s}.{satellite:s}.{sensor:s}.{algorithm:s}.{start_date:%Y%m%d}-S{start_time:%H%M%S}-E{end_time:%H%M%S}.{granule_id}.{version}.{data_format}",
        )
        .unwrap();
        let info = pattern.parse(filename).unwrap();
        assert_eq!(info.start_time, dt(2021, 7, 5, 1, 39, 42));
        assert_eq!(info.end_time, dt(2021, 7, 5, 3, 12, 14));

        let pattern = FilenamePattern::new(
            "{product_level:s}.{satellite:s}.{sensor:s}.{algorithm:s}.{start_time:%Y%m%d-S%H%M%S}-E{end_time:%H%M%S}.{granule_id}.{version}.{data_format}",
        )
        .unwrap();
        let info = pattern.parse(filename).unwrap();
        assert_eq!(info.start_time, dt(2021, 7, 5, 1, 39, 42));
        assert_eq!(info.end_time, dt(2021, 7, 5, 3, 12, 14));
        assert_eq!(info.fields.get("granule_id").unwrap(), "041760");
    }

    #[test]
    fn time_only_with_start_date() {
        let pattern =
            FilenamePattern::new("{start_date:%Y%m%d}-S{start_time:%H%M%S}-E{end_time:%H%M%S}")
                .unwrap();
        let info = pattern.parse("20240501-S120000-E123000").unwrap();
        assert_eq!(info.start_time, dt(2024, 5, 1, 12, 0, 0));
        assert_eq!(info.end_time, dt(2024, 5, 1, 12, 30, 0));
    }

    #[test]
    fn end_time_wraps_to_next_day() {
        let pattern =
            FilenamePattern::new("{start_date:%Y%m%d}-S{start_time:%H%M%S}-E{end_time:%H%M%S}")
                .unwrap();
        let info = pattern.parse("20240501-S230000-E003000").unwrap();
        assert_eq!(info.start_time, dt(2024, 5, 1, 23, 0, 0));
        assert_eq!(info.end_time, dt(2024, 5, 2, 0, 30, 0));
    }

    #[test]
    fn time_only_with_start_and_end_date() {
        let pattern = FilenamePattern::new(
            "{start_date:%Y%m%d}-S{start_time:%H%M%S}-{end_date:%Y%m%d}-E{end_time:%H%M%S}",
        )
        .unwrap();
        let info = pattern.parse("20240501-S230000-20240502-E003000").unwrap();
        assert_eq!(info.start_time, dt(2024, 5, 1, 23, 0, 0));
        assert_eq!(info.end_time, dt(2024, 5, 2, 0, 30, 0));
    }

    #[test]
    fn missing_start_date_is_an_error() {
        let pattern = FilenamePattern::new("S{start_time:%H%M%S}-E{end_time:%H%M%S}").unwrap();
        let err = pattern.parse("S120000-E123000").unwrap_err();
        assert!(err.to_string().contains("start_date is missing"));
    }

    #[test]
    fn missing_end_time_defaults_to_two_hours() {
        let pattern = FilenamePattern::new("{start_date:%Y%m%d}-S{start_time:%H%M%S}").unwrap();
        let info = pattern.parse("20240501-S120000").unwrap();
        assert_eq!(info.start_time, dt(2024, 5, 1, 12, 0, 0));
        assert_eq!(info.end_time, dt(2024, 5, 1, 14, 0, 0));
    }

    #[test]
    fn multi_pattern_fallback() {
        let patterns = vec![
            FilenamePattern::new("{start_time:%Y%m%dT%H%M%S}-{end_time:%Y%m%dT%H%M%S}").unwrap(),
            FilenamePattern::new("{start_date:%Y%m%d}-S{start_time:%H%M%S}-E{end_time:%H%M%S}")
                .unwrap(),
        ];
        let info = parse_any("20240501-S120000-E123000", &patterns).unwrap();
        assert_eq!(info.start_time, dt(2024, 5, 1, 12, 0, 0));
        assert!(parse_any("not-a-granule", &patterns).is_err());
    }

    #[test]
    fn path_time_filtering_keeps_overlapping_granules() {
        let patterns = vec![
            FilenamePattern::new("{start_time:%Y%m%dT%H%M%S}-{end_time:%Y%m%dT%H%M%S}.parquet")
                .unwrap(),
        ];
        let paths = vec![
            PathBuf::from("/x/20240501T000000-20240501T010000.parquet"),
            PathBuf::from("/x/20240501T020000-20240501T030000.parquet"),
            PathBuf::from("/x/20240501T050000-20240501T060000.parquet"),
        ];
        let kept = filter_paths_by_time(
            paths,
            &patterns,
            dt(2024, 5, 1, 0, 30, 0),
            dt(2024, 5, 1, 2, 0, 0),
        )
        .unwrap();
        assert_eq!(kept.len(), 1);
        assert!(kept[0].to_string_lossy().contains("T000000"));
    }

    #[test]
    fn malformed_templates_are_rejected() {
        assert!(FilenamePattern::new("{unclosed").is_err());
        assert!(FilenamePattern::new("{}").is_err());
        assert!(FilenamePattern::new("{t:%Q}").is_err());
        // Adjacent free-text fields are ambiguous and rejected at parse time
        let adjacent = FilenamePattern::new("{a}{b}").unwrap();
        assert!(adjacent.parse("xy").is_err());
    }
}
