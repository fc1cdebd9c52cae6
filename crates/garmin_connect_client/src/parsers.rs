//! Per-metric extraction from raw wellness endpoint responses.
//!
//! Every parser tolerates missing or reshaped fields and leaves the target
//! field unset instead of failing.

use crate::DailyMetrics;
use crate::json_walk::{NumericSearch, number_as_i64, read_first_f64, read_first_i64};
use serde_json::Value;

const GRAMS_PER_KG: f64 = 1000.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Where an HRV reading may hide in `/hrv-service` responses.
pub const HRV_SEARCH: NumericSearch<'static> = NumericSearch {
    direct_keys: &[
        "lastNightAvg",
        "overnightAvg",
        "hrvValue",
        "dailyAvg",
        "dailyHrv",
        "avgHrv",
        "averageHrv",
        "rmssdAvg",
        "rmssdAverage",
        "rmssd",
        "hrv",
    ],
    nested_keys: &["hrvSummary", "summary", "data", "hrvStatus", "lastNight"],
    series_keys: &["hrvValuesArray", "hrvValues", "rmssdValues", "values"],
    entry_value_keys: &["value", "hrvValue", "rmssd", "hrv"],
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BodyBatteryRange {
    pub lowest: Option<i64>,
    pub highest: Option<i64>,
}

/// Daily body-battery report: explicit `min`/`max` on the first element, or
/// a scan of its `bodyBatteryValuesArray` when either is missing.
pub fn parse_body_battery(root: &Value) -> BodyBatteryRange {
    let Some(day) = root.as_array().and_then(|days| days.first()) else {
        return BodyBatteryRange::default();
    };
    let mut range = BodyBatteryRange {
        lowest: read_first_i64(day, &["min"]),
        highest: read_first_i64(day, &["max"]),
    };
    if range.lowest.is_some() && range.highest.is_some() {
        return range;
    }
    let Some(values) = day.get("bodyBatteryValuesArray").and_then(Value::as_array) else {
        return range;
    };
    let (mut min, mut max, mut found) = (100, 0, false);
    for pair in values.iter().filter_map(Value::as_array) {
        if let Some(level) = pair.get(1).and_then(number_as_i64) {
            min = min.min(level);
            max = max.max(level);
            found = true;
        }
    }
    if found {
        range.lowest = Some(min);
        range.highest = Some(max);
    }
    range
}

/// Resting HR, VO2max and weight from the daily user summary.
pub fn apply_daily_summary(metrics: &mut DailyMetrics, root: &Value) {
    if let Some(rhr) = read_first_i64(root, &["restingHeartRate"]) {
        metrics.resting_heart_rate = Some(rhr);
    }
    if let Some(vo2) = read_first_f64(root, &["vo2Max"]) {
        metrics.vo2_max = Some(vo2);
    }
    if metrics.weight_kg.is_none() {
        metrics.weight_kg = read_first_f64(root, &["wellnessWeight", "weight"]).map(|g| g / GRAMS_PER_KG);
    }
}

/// Weight from the weight-range endpoint; never overwrites an existing value.
pub fn apply_weight_range(metrics: &mut DailyMetrics, root: &Value) {
    if metrics.weight_kg.is_some() {
        return;
    }
    metrics.weight_kg = root
        .get("weightUnitEntries")
        .and_then(Value::as_array)
        .and_then(|entries| entries.first())
        .and_then(|entry| read_first_f64(entry, &["weight"]))
        .map(|g| g / GRAMS_PER_KG);
}

pub fn apply_sleep(metrics: &mut DailyMetrics, root: &Value) {
    let Some(dto) = root.get("dailySleepDTO") else {
        return;
    };
    if let Some(seconds) = read_first_f64(dto, &["sleepTimeSeconds"]) {
        metrics.sleep_duration_hours = Some(seconds / SECONDS_PER_HOUR);
    }
    let score = read_first_i64(dto, &["sleepScore"])
        .or_else(|| dto.pointer("/sleepScores/overall/value").and_then(number_as_i64));
    if let Some(score) = score {
        metrics.sleep_score = Some(score);
    }
}

/// True while the summary left resting HR unset or reported zero.
pub fn needs_resting_hr_fallback(metrics: &DailyMetrics) -> bool {
    matches!(metrics.resting_heart_rate, None | Some(0))
}

/// Resting HR from the user-stats endpoint (first entry's `value`).
pub fn apply_resting_hr_fallback(metrics: &mut DailyMetrics, root: &Value) {
    if let Some(value) = root
        .as_array()
        .and_then(|entries| entries.first())
        .and_then(|entry| read_first_i64(entry, &["value"]))
    {
        metrics.resting_heart_rate = Some(value);
    }
}

pub fn extract_hrv(root: &Value) -> Option<f64> {
    HRV_SEARCH.find(root)
}

/// Display identifier from a social-profile or user-settings response.
pub fn extract_display_name(root: &Value) -> Option<String> {
    const NAME_KEYS: [&str; 2] = ["displayName", "userName"];
    let user_data = root.get("userData");
    [Some(root), user_data]
        .into_iter()
        .flatten()
        .flat_map(|node| NAME_KEYS.iter().filter_map(move |key| node.get(*key)?.as_str()))
        .find(|name| !name.is_empty())
        .map(str::to_owned)
}
