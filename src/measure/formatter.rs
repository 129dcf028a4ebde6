use super::{Segment, SizeDiff, SizeMetrics};
use std::fmt::Write;
use std::time::Duration;

const RULE_WIDTH: usize = 90;

/// Renders a size comparison as a fixed-width table.
///
/// ```text
/// 📊 Build Results for: hello_rust
/// ------------------------------------------------------------------------------------------
/// Section           Baseline        With Crate                 Difference     Impact
/// ------------------------------------------------------------------------------------------
/// text         156,540 bytes     160,000 bytes         +3,460 (  +2.2%)       🟡
/// ```
#[derive(Debug, Clone, Default)]
pub struct SizeReportFormatter {
    build_time: Option<Duration>,
}

impl SizeReportFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a build-time line to the report.
    pub fn with_build_time(mut self, elapsed: Duration) -> Self {
        self.build_time = Some(elapsed);
        self
    }

    pub fn render(
        &self,
        crate_name: &str,
        baseline: &SizeMetrics,
        candidate: &SizeMetrics,
        diff: &SizeDiff,
    ) -> String {
        let rule = "-".repeat(RULE_WIDTH);
        let mut out = String::new();

        let _ = writeln!(out, "📊 Build Results for: {}", crate_name);
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(
            out,
            "{:<10} {:>17} {:>17} {:>26} {:>10}",
            "Section", "Baseline", "With Crate", "Difference", "Impact"
        );
        let _ = writeln!(out, "{}", rule);

        for segment in Segment::ALL {
            let delta = diff.get(segment);
            let difference = format!(
                "{} ({:>7})",
                signed_thousands(delta.absolute),
                format!("{:+.1}%", delta.percentage)
            );
            let _ = writeln!(
                out,
                "{:<10} {:>17} {:>17} {:>26} {:>9}",
                segment.name(),
                format!("{} bytes", thousands(baseline.segment(segment))),
                format!("{} bytes", thousands(candidate.segment(segment))),
                difference,
                delta.severity.icon()
            );
        }

        if let Some(elapsed) = self.build_time {
            let _ = writeln!(out, "{}", rule);
            let _ = writeln!(out, "⏱️  Build time: {:.2} seconds", elapsed.as_secs_f64());
        }
        out
    }
}

/// `1234567` -> `1,234,567`.
fn thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Always signed: `+3,460`, `-12`, `+0`.
fn signed_thousands(value: i64) -> String {
    let sign = if value < 0 { '-' } else { '+' };
    format!("{}{}", sign, thousands(value.unsigned_abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::diff;

    #[test]
    fn test_thousands() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(185012), "185,012");
        assert_eq!(thousands(1234567), "1,234,567");
    }

    #[test]
    fn test_signed_thousands() {
        assert_eq!(signed_thousands(3460), "+3,460");
        assert_eq!(signed_thousands(-12), "-12");
        assert_eq!(signed_thousands(0), "+0");
        assert_eq!(signed_thousands(-1_000_000), "-1,000,000");
    }

    #[test]
    fn test_render_table() {
        let baseline = SizeMetrics::new(156540, 1016, 27456).unwrap();
        let candidate = SizeMetrics::new(160000, 1016, 27000).unwrap();
        let report = SizeReportFormatter::new()
            .with_build_time(Duration::from_millis(12340))
            .render("hello_rust", &baseline, &candidate, &diff(&baseline, &candidate));

        assert!(report.starts_with("📊 Build Results for: hello_rust\n"));
        assert!(report.contains("156,540 bytes"));
        assert!(report.contains("160,000 bytes"));
        assert!(report.contains("+3,460"));
        assert!(report.contains("+2.2%"));
        assert!(report.contains("-456"));
        assert!(report.contains("🟡"));
        assert!(report.contains("🟢"));
        assert!(report.contains("⚪"));
        assert!(report.contains("Build time: 12.34 seconds"));

        let rows: Vec<&str> = report
            .lines()
            .filter(|l| ["text", "data", "bss", "total"].iter().any(|s| l.starts_with(s)))
            .collect();
        assert_eq!(rows.len(), 4);
    }

    #[test]
    fn test_render_without_build_time() {
        let m = SizeMetrics::zero();
        let report = SizeReportFormatter::new().render("x", &m, &m, &diff(&m, &m));
        assert!(!report.contains("Build time"));
    }
}
