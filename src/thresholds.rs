//! Quality gate applied to the top V-gene hit of each query
//!
//! A hit is accepted only when its bit score, alignment length and subject
//! start all fall inside their closed intervals.

use anyhow::{bail, Result};
use std::ops::RangeInclusive;

#[derive(Debug, Clone, PartialEq)]
pub struct FilterThresholds {
    pub bit_score: RangeInclusive<f64>,
    pub align_len: RangeInclusive<i64>,
    pub subject_start: RangeInclusive<i64>,
}

impl Default for FilterThresholds {
    fn default() -> Self {
        Self {
            bit_score: 0.0..=f64::INFINITY,
            align_len: 0..=i64::MAX,
            subject_start: 1..=i64::MAX,
        }
    }
}

impl FilterThresholds {
    pub fn new(
        bit_score: RangeInclusive<f64>,
        align_len: RangeInclusive<i64>,
        subject_start: RangeInclusive<i64>,
    ) -> Self {
        Self {
            bit_score,
            align_len,
            subject_start,
        }
    }

    /// Check a hit against all three intervals.
    ///
    /// A missing alignment length or subject start never passes.
    pub fn accepts(&self, bit_score: f64, align_len: Option<i64>, subject_start: Option<i64>) -> bool {
        let (Some(align_len), Some(subject_start)) = (align_len, subject_start) else {
            return false;
        };
        self.bit_score.contains(&bit_score)
            && self.align_len.contains(&align_len)
            && self.subject_start.contains(&subject_start)
    }
}

fn is_unbounded(s: &str) -> bool {
    matches!(
        s.to_lowercase().as_str(),
        "inf" | "infinity" | "∞" | "max" | ""
    )
}

/// Parse a `MIN:MAX` float interval; `inf` (or an empty side) leaves it open.
pub fn parse_float_range(s: &str) -> Result<RangeInclusive<f64>, String> {
    parse_bounds(s)
        .and_then(|(lo, hi)| {
            let lo = if is_unbounded(lo) { 0.0 } else { lo.parse::<f64>()? };
            let hi = if is_unbounded(hi) {
                f64::INFINITY
            } else {
                hi.parse::<f64>()?
            };
            check_order(lo, hi)?;
            Ok(lo..=hi)
        })
        .map_err(|e| format!("Invalid range '{s}': {e}"))
}

/// Parse a `MIN:MAX` integer interval; `inf` (or an empty side) leaves it open.
pub fn parse_int_range(s: &str) -> Result<RangeInclusive<i64>, String> {
    parse_bounds(s)
        .and_then(|(lo, hi)| {
            let lo = if is_unbounded(lo) { 0 } else { lo.parse::<i64>()? };
            let hi = if is_unbounded(hi) {
                i64::MAX
            } else {
                hi.parse::<i64>()?
            };
            check_order(lo, hi)?;
            Ok(lo..=hi)
        })
        .map_err(|e| format!("Invalid range '{s}': {e}"))
}

fn parse_bounds(s: &str) -> Result<(&str, &str)> {
    match s.trim().split_once(':') {
        Some((lo, hi)) => Ok((lo.trim(), hi.trim())),
        None => bail!("expected MIN:MAX"),
    }
}

fn check_order<T: PartialOrd + std::fmt::Display>(lo: T, hi: T) -> Result<()> {
    if lo > hi {
        bail!("minimum {lo} is larger than maximum {hi}");
    }
    Ok(())
}
