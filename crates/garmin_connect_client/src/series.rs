//! Stress/heart-rate series normalization.
//!
//! Raw series arrive with timestamps as epoch milliseconds, epoch seconds, or
//! offsets from a per-response base time. Entries are normalized to absolute
//! milliseconds, then averaged into fixed-width buckets.

use crate::WellnessSample;
use crate::json_walk::{
    find_array_by_keys, find_first_array, number_as_i64, read_first_f64, read_first_i64, read_first_str,
};
use crate::utils::{local_midnight_ms, parse_timestamp_text};
use chrono::{NaiveDate, TimeZone};
use serde_json::Value;
use std::collections::BTreeMap;

pub const DEFAULT_BUCKET_MINUTES: u32 = 5;

const MS_THRESHOLD: i64 = 1_000_000_000_000;
const SECONDS_THRESHOLD: i64 = 1_000_000_000;
const DAY_SECONDS: i64 = 86_400;
const DAY_MILLIS: i64 = 86_400_000;

const TIMESTAMP_KEYS: &[&str] = &[
    "timestamp",
    "timestampLocal",
    "timestampGMT",
    "timeOffset",
    "timeOffsetMillis",
    "startTimeInSeconds",
    "startTimeInMillis",
    "timeInSeconds",
    "timeInMillis",
    "time",
    "ts",
];
// Narrower sets used only to recognize an unnamed array as a series.
const DETECTION_TIMESTAMP_KEYS: &[&str] = &["timestamp", "timestampLocal", "timestampGMT", "time", "ts"];
const DETECTION_VALUE_KEYS: &[&str] = &["value", "stress", "stressLevel", "heartRate", "hr", "bpm"];

const BASE_NUMERIC_KEYS: &[&str] = &["startTimestampLocal", "startTimestampGMT", "startTimestamp", "startTime"];
const BASE_TEXT_KEYS: &[&str] = &["startTimestampLocal", "startTimestampGMT", "startTime", "calendarDate"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SeriesKind {
    Stress,
    HeartRate,
}

impl SeriesKind {
    /// Candidate names of the array holding this series, highest priority first.
    pub fn series_keys(self) -> &'static [&'static str] {
        match self {
            SeriesKind::Stress => &["stressValuesArray", "stressValues", "valuesArray", "values", "stress"],
            SeriesKind::HeartRate => &["heartRateValuesArray", "heartRateValues", "hrValuesArray", "hrValues", "values"],
        }
    }

    /// Candidate value fields of object-shaped entries.
    pub fn value_keys(self) -> &'static [&'static str] {
        match self {
            SeriesKind::Stress => &["value", "stress", "stressLevel"],
            SeriesKind::HeartRate => &["value", "heartRate", "hr", "bpm", "beatsPerMinute"],
        }
    }
}

/// One reading with an absolute timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawSeriesEntry {
    pub timestamp_ms: i64,
    pub value: u32,
}

/// Interpret an absolute epoch value; `None` for anything that is not
/// plausibly seconds or milliseconds.
pub fn normalize_epoch_millis(value: i64) -> Option<i64> {
    if value <= 0 {
        None
    } else if value >= MS_THRESHOLD {
        Some(value)
    } else if value >= SECONDS_THRESHOLD {
        Some(value * 1000)
    } else {
        None
    }
}

/// Normalize a raw entry timestamp against `base_ms`.
///
/// Absolute epoch values pass through; small values are offsets (seconds up
/// to one day, milliseconds up to one day); anything else is treated as a
/// seconds offset.
pub fn to_epoch_millis(raw: i64, base_ms: i64) -> Option<i64> {
    if raw <= 0 {
        return None;
    }
    if let Some(absolute) = normalize_epoch_millis(raw) {
        return Some(absolute);
    }
    let offset_ms = if raw > DAY_SECONDS && raw <= DAY_MILLIS {
        raw
    } else {
        raw.checked_mul(1000)?
    };
    base_ms.checked_add(offset_ms)
}

/// Base time for offset-style timestamps in `root`.
pub fn resolve_base_epoch_ms<Tz: TimeZone>(root: &Value, date: NaiveDate, tz: &Tz) -> i64 {
    if let Some(base) = read_first_i64(root, BASE_NUMERIC_KEYS).and_then(normalize_epoch_millis) {
        return base;
    }
    if let Some(base) = read_first_str(root, BASE_TEXT_KEYS).and_then(|t| parse_timestamp_text(t, tz)) {
        return base;
    }
    local_midnight_ms(date, tz)
}

/// Locate and read the `kind` series in a raw endpoint response.
pub fn parse_series<Tz: TimeZone>(
    root: &Value,
    date: NaiveDate,
    kind: SeriesKind,
    tz: &Tz,
) -> Vec<RawSeriesEntry> {
    let Some(series) = find_array_by_keys(root, kind.series_keys()).or_else(|| find_first_array(root, looks_like_series))
    else {
        return Vec::new();
    };
    let Some(entries) = series.as_array() else {
        return Vec::new();
    };
    let base_ms = resolve_base_epoch_ms(root, date, tz);
    entries
        .iter()
        .filter_map(|entry| {
            Some(RawSeriesEntry {
                timestamp_ms: extract_timestamp(entry, base_ms)?,
                value: extract_value(entry, kind)?,
            })
        })
        .collect()
}

fn looks_like_series(node: &Value) -> bool {
    let Some(items) = node.as_array() else {
        return false;
    };
    items.iter().any(|entry| match entry {
        Value::Array(pair) => pair.len() > 1 && pair[0].is_number() && pair[1].is_number(),
        Value::Object(_) => {
            read_first_i64(entry, DETECTION_TIMESTAMP_KEYS).is_some()
                && read_first_f64(entry, DETECTION_VALUE_KEYS).is_some()
        }
        _ => false,
    })
}

fn extract_timestamp(entry: &Value, base_ms: i64) -> Option<i64> {
    let raw = match entry {
        Value::Array(items) => number_as_i64(items.first()?)?,
        Value::Object(_) => read_first_i64(entry, TIMESTAMP_KEYS)?,
        Value::Number(_) => number_as_i64(entry)?,
        _ => return None,
    };
    to_epoch_millis(raw, base_ms)
}

fn extract_value(entry: &Value, kind: SeriesKind) -> Option<u32> {
    let value = match entry {
        Value::Array(items) if items.len() > 1 => items[1].as_f64()?,
        Value::Object(_) => read_first_f64(entry, kind.value_keys())?,
        Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    // Negatives are sentinel values for "no reading".
    if value < 0.0 {
        return None;
    }
    let rounded = (value + 0.5).floor();
    if !rounded.is_finite() || rounded > f64::from(u32::MAX) {
        return None;
    }
    Some(rounded as u32)
}

#[derive(Clone, Copy, Debug, Default)]
struct Accumulator {
    total: u64,
    count: u64,
}

impl Accumulator {
    fn add(&mut self, value: u32) {
        self.total += u64::from(value);
        self.count += 1;
    }

    /// Half-up rounded mean; `None` when nothing was added.
    fn average(&self) -> Option<u32> {
        if self.count == 0 {
            return None;
        }
        Some(((2 * self.total + self.count) / (2 * self.count)) as u32)
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Bucket {
    stress: Accumulator,
    heart_rate: Accumulator,
}

/// Fixed-width time buckets keyed by bucket start (epoch ms).
#[derive(Debug)]
pub struct WellnessBuckets {
    size_ms: i64,
    buckets: BTreeMap<i64, Bucket>,
}

impl WellnessBuckets {
    pub fn new(bucket_minutes: u32) -> Self {
        Self {
            size_ms: i64::from(bucket_minutes.max(1)) * 60_000,
            buckets: BTreeMap::new(),
        }
    }

    pub fn bucket_start(&self, timestamp_ms: i64) -> i64 {
        timestamp_ms.div_euclid(self.size_ms) * self.size_ms
    }

    pub fn add(&mut self, kind: SeriesKind, entry: RawSeriesEntry) {
        let start = self.bucket_start(entry.timestamp_ms);
        let bucket = self.buckets.entry(start).or_default();
        match kind {
            SeriesKind::Stress => bucket.stress.add(entry.value),
            SeriesKind::HeartRate => bucket.heart_rate.add(entry.value),
        }
    }

    pub fn extend(&mut self, kind: SeriesKind, entries: impl IntoIterator<Item = RawSeriesEntry>) {
        for entry in entries {
            self.add(kind, entry);
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Averaged samples in ascending bucket order. Each sample is dated by its
    /// own bucket start in `tz`.
    pub fn into_samples<Tz: TimeZone>(self, tz: Tz) -> impl Iterator<Item = WellnessSample> {
        self.buckets.into_iter().filter_map(move |(start, bucket)| {
            let local = tz.timestamp_millis_opt(start).single()?;
            Some(WellnessSample {
                date: local.date_naive(),
                timestamp: local.naive_local(),
                stress: bucket.stress.average(),
                heart_rate: bucket.heart_rate.average(),
            })
        })
    }
}
