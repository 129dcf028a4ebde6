//! Per-segment size deltas and their severity tiers.

use super::SizeMetrics;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A memory segment reported by `size`, plus their sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    Text,
    Data,
    Bss,
    Total,
}

impl Segment {
    /// Every segment in report order.
    pub const ALL: [Segment; 4] = [Segment::Text, Segment::Data, Segment::Bss, Segment::Total];

    pub fn name(self) -> &'static str {
        match self {
            Segment::Text => "text",
            Segment::Data => "data",
            Segment::Bss => "bss",
            Segment::Total => "total",
        }
    }
}

/// How much a segment grew or shrank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// More than 50% growth.
    Major,
    /// More than 15%, up to 50%.
    Moderate,
    /// More than 0%, up to 15%.
    Minor,
    /// Shrank.
    Decrease,
    /// Unchanged.
    #[serde(rename = "none")]
    NoChange,
}

impl Severity {
    /// Tag used in reports: `major`, `moderate`, `minor`, `decrease` or `none`.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Major => "major",
            Severity::Moderate => "moderate",
            Severity::Minor => "minor",
            Severity::Decrease => "decrease",
            Severity::NoChange => "none",
        }
    }

    /// Colored marker for terminal tables.
    pub fn icon(self) -> &'static str {
        match self {
            Severity::Major => "🔴",
            Severity::Moderate => "🟠",
            Severity::Minor => "🟡",
            Severity::Decrease => "🟢",
            Severity::NoChange => "⚪",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier for a percentage change. Each positive tier excludes its lower bound.
pub fn severity(pct: f64) -> Severity {
    if pct > 50.0 {
        Severity::Major
    } else if pct > 15.0 {
        Severity::Moderate
    } else if pct > 0.0 {
        Severity::Minor
    } else if pct < 0.0 {
        Severity::Decrease
    } else {
        Severity::NoChange
    }
}

/// Change of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeDelta {
    /// Candidate minus baseline, in bytes.
    pub absolute: i64,
    /// Change relative to the baseline; 0 when the baseline is 0.
    pub percentage: f64,
    pub severity: Severity,
}

impl SizeDelta {
    fn between(baseline: u64, candidate: u64) -> Self {
        let change = i128::from(candidate) - i128::from(baseline);
        let percentage = if baseline == 0 {
            0.0
        } else {
            change as f64 / baseline as f64 * 100.0
        };
        Self {
            absolute: saturate_i64(change),
            percentage,
            severity: severity(percentage),
        }
    }
}

/// Clamp a byte difference into `i64`.
pub(crate) fn saturate_i64(value: i128) -> i64 {
    value.clamp(i64::MIN.into(), i64::MAX.into()) as i64
}

/// Deltas for every segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeDiff {
    pub text: SizeDelta,
    pub data: SizeDelta,
    pub bss: SizeDelta,
    pub total: SizeDelta,
}

impl SizeDiff {
    /// Delta of one segment.
    pub fn get(&self, segment: Segment) -> &SizeDelta {
        match segment {
            Segment::Text => &self.text,
            Segment::Data => &self.data,
            Segment::Bss => &self.bss,
            Segment::Total => &self.total,
        }
    }

    /// Segments paired with their deltas, in report order.
    pub fn iter(&self) -> impl Iterator<Item = (Segment, &SizeDelta)> {
        Segment::ALL.into_iter().map(move |segment| (segment, self.get(segment)))
    }
}

/// Compare a candidate build against the baseline, segment by segment.
pub fn diff(baseline: &SizeMetrics, candidate: &SizeMetrics) -> SizeDiff {
    let delta = |segment| SizeDelta::between(baseline.segment(segment), candidate.segment(segment));
    SizeDiff {
        text: delta(Segment::Text),
        data: delta(Segment::Data),
        bss: delta(Segment::Bss),
        total: delta(Segment::Total),
    }
}
