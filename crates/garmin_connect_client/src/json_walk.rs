//! Bounded-depth lookups over `serde_json::Value` trees.
//!
//! Garmin responses move fields around between endpoint versions, so callers
//! pass prioritized key lists and let these helpers do the traversal.

use serde_json::Value;

/// Deepest nesting level any walker descends to.
pub const MAX_DEPTH: usize = 32;

/// Integer view of any JSON number; floats are truncated.
pub fn number_as_i64(v: &Value) -> Option<i64> {
    v.as_i64()
        .or_else(|| v.as_u64().map(|u| u as i64))
        .or_else(|| v.as_f64().map(|f| f as i64))
}

pub fn read_first_f64(node: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| node.get(k).and_then(Value::as_f64))
}

pub fn read_first_i64(node: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| node.get(k).and_then(number_as_i64))
}

pub fn read_first_str<'a>(node: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| node.get(k).and_then(Value::as_str))
}

/// First array stored under any of `keys`, searched anywhere in the tree.
/// Keys are tried in priority order; each key gets a full depth-first pass.
pub fn find_array_by_keys<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter(|k| !k.is_empty())
        .find_map(|k| find_array_by_key(root, k, 0))
}

fn find_array_by_key<'a>(node: &'a Value, key: &str, depth: usize) -> Option<&'a Value> {
    if depth > MAX_DEPTH {
        return None;
    }
    match node {
        Value::Object(map) => {
            if let Some(direct @ Value::Array(_)) = map.get(key) {
                return Some(direct);
            }
            map.values()
                .find_map(|child| find_array_by_key(child, key, depth + 1))
        }
        Value::Array(items) => items
            .iter()
            .find_map(|child| find_array_by_key(child, key, depth + 1)),
        _ => None,
    }
}

/// First array (depth-first, parents before children) accepted by `matches`.
pub fn find_first_array<'a, F>(root: &'a Value, matches: F) -> Option<&'a Value>
where
    F: Fn(&Value) -> bool + Copy,
{
    find_first_array_at(root, matches, 0)
}

fn find_first_array_at<'a, F>(node: &'a Value, matches: F, depth: usize) -> Option<&'a Value>
where
    F: Fn(&Value) -> bool + Copy,
{
    if depth > MAX_DEPTH {
        return None;
    }
    match node {
        Value::Array(items) => {
            if matches(node) {
                return Some(node);
            }
            items
                .iter()
                .find_map(|child| find_first_array_at(child, matches, depth + 1))
        }
        Value::Object(map) => map
            .values()
            .find_map(|child| find_first_array_at(child, matches, depth + 1)),
        _ => None,
    }
}

/// Prioritized search for a single numeric reading.
///
/// At each level: direct keys first, then recursion into nested objects,
/// then averaging of candidate series, then the node itself if it is an array.
#[derive(Clone, Copy, Debug)]
pub struct NumericSearch<'a> {
    pub direct_keys: &'a [&'a str],
    pub nested_keys: &'a [&'a str],
    pub series_keys: &'a [&'a str],
    /// Value fields read from object-shaped series entries.
    pub entry_value_keys: &'a [&'a str],
}

impl NumericSearch<'_> {
    pub fn find(&self, root: &Value) -> Option<f64> {
        self.find_at(root, 0)
    }

    fn find_at(&self, node: &Value, depth: usize) -> Option<f64> {
        if depth > MAX_DEPTH || node.is_null() {
            return None;
        }
        if let Some(v) = read_first_f64(node, self.direct_keys) {
            return Some(v);
        }
        for key in self.nested_keys {
            if let Some(v) = node.get(key).and_then(|n| self.find_at(n, depth + 1)) {
                return Some(v);
            }
        }
        for key in self.series_keys {
            if let Some(v) = node.get(key).and_then(|s| self.average(s)) {
                return Some(v);
            }
        }
        if node.is_array() {
            return self.average(node);
        }
        None
    }

    /// Mean of a series whose entries are `[ts, value]`, objects, or bare numbers.
    pub fn average(&self, series: &Value) -> Option<f64> {
        let items = series.as_array()?;
        let values: Vec<f64> = items
            .iter()
            .filter_map(|entry| match entry {
                Value::Array(pair) if pair.len() > 1 => pair[1].as_f64(),
                Value::Object(_) => read_first_f64(entry, self.entry_value_keys),
                Value::Number(n) => n.as_f64(),
                _ => None,
            })
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
