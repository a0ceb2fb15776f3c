use chrono::{DateTime, NaiveDateTime, Utc};

/// Clamp a battery percentage to [0, 100]. Non-finite input maps to 0.
pub fn clamp_pct(value: f64) -> f64 {
    if value.is_finite() { value.clamp(0.0, 100.0) } else { 0.0 }
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Parse a numeric CSV/CLI field leniently.
///
/// Empty fields, `N/A` and non-numeric text yield `None`; trailing units such as `%`, `V` or `°`
/// are ignored.
pub fn parse_lenient_f64(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("n/a") {
        return None;
    }
    let numeric = trimmed.trim_end_matches(|c: char| !(c.is_ascii_digit() || c == '.'));
    numeric.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Collector timestamps are either RFC 3339 or naive ISO-8601 (written without offset); naive
/// values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / 3600.0
}
