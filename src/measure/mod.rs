//! Firmware size figures and how they change when a crate is enabled.
//!
//! [`SizeMetrics`] holds the segment sizes of one build, [`diff`] compares a
//! candidate build against a baseline and [`SizeReportFormatter`] renders the
//! comparison as a table.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};

pub mod delta;
mod formatter;

pub use delta::{Segment, Severity, SizeDelta, SizeDiff, diff, severity};
pub use formatter::SizeReportFormatter;

/// Segment sizes of one firmware image, in bytes.
///
/// `total` always equals `text + data + bss`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawSizeMetrics")]
pub struct SizeMetrics {
    text: u64,
    data: u64,
    bss: u64,
    total: u64,
}

/// Unchecked form used for deserialization.
#[derive(Deserialize)]
struct RawSizeMetrics {
    text: u64,
    data: u64,
    bss: u64,
    total: u64,
}

impl TryFrom<RawSizeMetrics> for SizeMetrics {
    type Error = Error;

    fn try_from(raw: RawSizeMetrics) -> Result<Self> {
        Self::from_parts(raw.text, raw.data, raw.bss, raw.total)
    }
}

impl SizeMetrics {
    /// Build metrics from segment sizes; the total is their sum.
    pub fn new(text: u64, data: u64, bss: u64) -> Result<Self> {
        let total = text
            .checked_add(data)
            .and_then(|sum| sum.checked_add(bss))
            .ok_or_else(|| Error::parse("segment sizes overflow the total"))?;
        Self::from_parts(text, data, bss, total)
    }

    /// Assemble metrics from all four values, checking the total.
    pub fn from_parts(text: u64, data: u64, bss: u64, total: u64) -> Result<Self> {
        let sum = text.checked_add(data).and_then(|sum| sum.checked_add(bss));
        if sum != Some(total) {
            return Err(Error::parse(format!(
                "total {} does not equal text {} + data {} + bss {}",
                total, text, data, bss
            )));
        }
        Ok(Self {
            text,
            data,
            bss,
            total,
        })
    }

    /// All segments zero, reported when sizes could not be read.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn text(&self) -> u64 {
        self.text
    }

    pub fn data(&self) -> u64 {
        self.data
    }

    pub fn bss(&self) -> u64 {
        self.bss
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Size of one segment.
    pub fn segment(&self, segment: Segment) -> u64 {
        match segment {
            Segment::Text => self.text,
            Segment::Data => self.data,
            Segment::Bss => self.bss,
            Segment::Total => self.total,
        }
    }
}

/// Parse the output of a Berkeley-format `size` run.
///
/// ```text
///    text    data     bss     dec     hex filename
///  156540    1016   27456  185012   2d2b4 nuttx
/// ```
///
/// The first three columns of the second line are text, data and bss. Output
/// with fewer than two lines or fewer than five columns yields all zeros.
pub fn parse_size_report(report: &str) -> SizeMetrics {
    let lines: Vec<&str> = report.trim().lines().collect();
    if lines.len() < 2 {
        log::warn!("unexpected output format from size command: {:?}", report);
        return SizeMetrics::zero();
    }

    let values: Vec<&str> = lines[1].split_whitespace().collect();
    if values.len() < 5 {
        log::warn!("unexpected size output format: {:?}", lines[1]);
        return SizeMetrics::zero();
    }

    let parsed = values[..3]
        .iter()
        .map(|v| v.parse::<u64>())
        .collect::<std::result::Result<Vec<u64>, _>>()
        .map_err(|e| Error::parse(e.to_string()))
        .and_then(|v| SizeMetrics::new(v[0], v[1], v[2]));
    match parsed {
        Ok(metrics) => metrics,
        Err(e) => {
            log::warn!("could not read sizes from {:?}: {}", lines[1], e);
            SizeMetrics::zero()
        }
    }
}
