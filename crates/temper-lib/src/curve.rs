//! Piecewise-linear control curves
//!
//! A curve maps a temperature reading to a control output (fan percent,
//! power watts) by interpolating between sorted setpoints. Setpoints are
//! written as whitespace-separated `temp:value` tokens, e.g.
//! `"30:20 60:50 80:100"`.

use serde::{Deserialize, Serialize};

/// A single temperature -> output setpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub temperature: u32,
    pub value: u32,
}

/// Ordered set of setpoints defining a control function
///
/// An empty curve means the control it feeds is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlCurve {
    points: Vec<CurvePoint>,
}

impl ControlCurve {
    /// Build a curve from setpoint text.
    ///
    /// Malformed tokens are skipped. The resulting points are sorted by
    /// temperature; duplicates keep their relative order.
    pub fn parse(setpoints: &str) -> Self {
        let mut points: Vec<CurvePoint> = setpoints
            .split_whitespace()
            .filter_map(parse_token)
            .collect();

        points.sort_by_key(|p| p.temperature);

        Self { points }
    }

    /// Build a curve from already-constructed points
    pub fn from_points(mut points: Vec<CurvePoint>) -> Self {
        points.sort_by_key(|p| p.temperature);
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    /// Evaluate the curve at `temperature`.
    ///
    /// Clamps to the first/last value outside the configured range and
    /// linearly interpolates (truncating) inside it. Returns 0 when empty.
    pub fn evaluate(&self, temperature: u32) -> u32 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return 0,
        };

        if temperature <= first.temperature {
            return first.value;
        }
        if temperature >= last.temperature {
            return last.value;
        }

        for pair in self.points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if temperature >= lo.temperature && temperature <= hi.temperature {
                let temp_range = f64::from(hi.temperature - lo.temperature);
                // Duplicate temperatures bracket nothing; the next pair will
                if temp_range == 0.0 {
                    continue;
                }
                let value_range = f64::from(hi.value) - f64::from(lo.value);
                let offset = f64::from(temperature - lo.temperature);
                let value = f64::from(lo.value) + value_range * offset / temp_range;
                return value as u32;
            }
        }

        first.value
    }
}

fn parse_token(token: &str) -> Option<CurvePoint> {
    let (temp, value) = token.split_once(':')?;
    Some(CurvePoint {
        temperature: temp.parse().ok()?,
        value: value.parse().ok()?,
    })
}
