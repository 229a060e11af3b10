//! The cost formatter (spec.md §4.5)
//!
//! Turns a raw on-disk cost word into the string a caller of [`crate::reader::Reader`] sees,
//! relative to a trace's aggregated `summary` header. Modeled as a plain enum plus a free
//! function rather than methods on the cost type itself, matching the teacher's
//! `runner::format` module structuring cost presentation over plain data.

use clap::ValueEnum;

/// The three cost presentations a [`crate::reader::Reader`] can be configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CostFormat {
    /// `(cost * 100) / summary`, two decimal places
    Percent,
    /// `cost / 1000`, rounded half away from zero
    Msec,
    /// The raw cost, unchanged
    Usec,
}

/// Format `raw` according to `format`, relative to the trace's aggregated `summary` header
///
/// `header_summary` is the denominator for [`CostFormat::Percent`]; a `summary` of `0` formats
/// as `"0.00"` rather than dividing by zero.
pub fn format_cost(raw: u32, header_summary: u32, format: CostFormat) -> String {
    match format {
        CostFormat::Percent => {
            if header_summary == 0 {
                "0.00".to_owned()
            } else {
                let percent = (f64::from(raw) * 100.0) / f64::from(header_summary);
                format!("{percent:.2}")
            }
        }
        CostFormat::Msec => {
            let rounded = (u64::from(raw) + 500) / 1000;
            rounded.to_string()
        }
        CostFormat::Usec => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::half(50, 100, "50.00")]
    #[case::zero_summary(50, 0, "0.00")]
    #[case::fractional(1, 3, "33.33")]
    #[case::exact(100, 100, "100.00")]
    fn test_percent_format(#[case] raw: u32, #[case] summary: u32, #[case] expected: &str) {
        assert_eq!(format_cost(raw, summary, CostFormat::Percent), expected);
    }

    #[rstest]
    #[case::rounds_down(1499, "1")]
    #[case::rounds_up_half_away_from_zero(1500, "2")]
    #[case::exact_thousand(2000, "2")]
    #[case::zero(0, "0")]
    fn test_msec_format(#[case] raw: u32, #[case] expected: &str) {
        assert_eq!(format_cost(raw, 0, CostFormat::Msec), expected);
    }

    #[test]
    fn test_usec_format_passes_through() {
        assert_eq!(format_cost(12345, 0, CostFormat::Usec), "12345");
    }
}
