//! Prometheus text exposition scraping

use std::collections::HashMap;

/// Parse sample lines into `name -> value`.
///
/// Comment lines are skipped. Labels are ignored, so the first sample of a
/// metric family wins. A value that fails to parse is recorded as zero.
pub fn parse_samples(text: &str) -> HashMap<String, f64> {
    let mut samples = HashMap::new();

    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((name, rest)) = split_sample(line) else {
            continue;
        };
        let value = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .unwrap_or(0.0);

        samples.entry(name.to_string()).or_insert(value);
    }

    samples
}

/// Split `name{labels} value` or `name value` into name and the remainder
fn split_sample(line: &str) -> Option<(&str, &str)> {
    let name_end = line.find(|c: char| c == '{' || c.is_whitespace())?;
    let (name, rest) = line.split_at(name_end);
    if name.is_empty() {
        return None;
    }

    let rest = if rest.starts_with('{') {
        let close = rest.find('}')?;
        &rest[close + 1..]
    } else {
        rest
    };
    Some((name, rest))
}
