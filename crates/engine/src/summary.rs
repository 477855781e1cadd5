//! Range summaries.
//!
//! A multi-cell target is never expanded; it renders as a single leaf with
//! dimensions, one aggregate, and a content fingerprint. The fingerprint is a
//! pure function of the cells' stored content (array-formula cells enter as a
//! fixed sentinel), so identical ranges fingerprint identically no matter how
//! they were reached.

use sha2::{Digest, Sha256};

use gridvine_core::report::format_number;
use gridvine_io::CellContent;

/// Sentinel standing in for array-formula cells in the fingerprint input.
const ARRAY_FORMULA_SENTINEL: &str = "ArrayFormula";
/// Joins cell content strings in the fingerprint input.
const FINGERPRINT_DELIMITER: &str = "||";
/// Hex digits of the digest shown in the report.
const DIGEST_DISPLAY_LEN: usize = 8;

/// Aggregate classification of a range: first matching non-empty category
/// wins, in numeric → error → text priority order.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    Sum(f64),
    Errors(usize),
    Text,
    None,
}

/// Leaf description of a rectangular range.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSummary {
    pub rows: usize,
    pub cols: usize,
    pub aggregate: Aggregate,
    /// First hex digits of the content fingerprint.
    pub digest: String,
}

/// Summarize a rectangular read (row-major, empties included).
pub fn summarize(cells: &[Vec<CellContent>]) -> RangeSummary {
    let rows = cells.len();
    let cols = cells.first().map(Vec::len).unwrap_or(0);

    let mut sum = 0.0;
    let mut numeric_count = 0usize;
    let mut error_count = 0usize;
    let mut text_count = 0usize;
    let mut fingerprint_input = String::new();

    for row in cells {
        for cell in row {
            match cell {
                CellContent::Number(n) => {
                    sum += n;
                    numeric_count += 1;
                }
                // Booleans sum as 0/1 numerics.
                CellContent::Bool(b) => {
                    sum += if *b { 1.0 } else { 0.0 };
                    numeric_count += 1;
                }
                CellContent::Error(_) => error_count += 1,
                CellContent::Text(s) => {
                    if s.starts_with('#') {
                        error_count += 1;
                    } else {
                        text_count += 1;
                    }
                }
                // Stored formula text is a string.
                CellContent::Formula(_) => text_count += 1,
                CellContent::ArrayFormula(_) | CellContent::Empty => {}
            }

            if matches!(cell, CellContent::ArrayFormula(_)) {
                fingerprint_input.push_str(ARRAY_FORMULA_SENTINEL);
            } else {
                fingerprint_input.push_str(&content_text(cell));
            }
            fingerprint_input.push_str(FINGERPRINT_DELIMITER);
        }
    }

    let aggregate = if numeric_count > 0 {
        Aggregate::Sum(sum)
    } else if error_count > 0 {
        Aggregate::Errors(error_count)
    } else if text_count > 0 {
        Aggregate::Text
    } else {
        Aggregate::None
    };

    let mut hasher = Sha256::new();
    hasher.update(fingerprint_input.as_bytes());
    let digest: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(DIGEST_DISPLAY_LEN)
        .collect();

    RangeSummary {
        rows,
        cols,
        aggregate,
        digest,
    }
}

impl std::fmt::Display for RangeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}R x {}C]", self.rows, self.cols)?;
        match &self.aggregate {
            Aggregate::Sum(total) => write!(f, " [Sum: {}]", format_sum(*total))?,
            Aggregate::Errors(count) => write!(f, " [Errors: {count}]")?,
            Aggregate::Text => write!(f, " [Text]")?,
            Aggregate::None => {}
        }
        write!(f, " [Hash: {}...]", self.digest)
    }
}

fn content_text(cell: &CellContent) -> String {
    match cell {
        CellContent::Empty => String::new(),
        CellContent::Number(n) => format_number(*n),
        CellContent::Text(s) => s.clone(),
        CellContent::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        CellContent::Error(e) => e.clone(),
        CellContent::Formula(t) | CellContent::ArrayFormula(t) => t.clone(),
    }
}

/// Range sum with thousands grouping and two decimal places, the fraction
/// dropped only when it rounds to exactly zero.
pub fn format_sum(total: f64) -> String {
    let fixed = format!("{total:.2}");
    let (int_part, frac) = fixed.split_once('.').expect("two decimal places");
    let grouped = group_thousands(int_part);
    if frac == "00" {
        grouped
    } else {
        format!("{grouped}.{frac}")
    }
}

fn group_thousands(int_part: &str) -> String {
    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", int_part),
    };
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    format!("{sign}{out}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> CellContent {
        CellContent::Number(n)
    }

    #[test]
    fn test_format_sum() {
        assert_eq!(format_sum(1234.0), "1,234");
        assert_eq!(format_sum(1234.5), "1,234.50");
        assert_eq!(format_sum(100.006), "100.01");
        assert_eq!(format_sum(-1234567.25), "-1,234,567.25");
        assert_eq!(format_sum(0.0), "0");
    }

    #[test]
    fn test_numeric_aggregate_wins() {
        let cells = vec![
            vec![num(5.0), CellContent::Text("x".into())],
            vec![CellContent::Error("#REF!".into()), CellContent::Empty],
        ];
        let summary = summarize(&cells);
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.cols, 2);
        assert_eq!(summary.aggregate, Aggregate::Sum(5.0));
    }

    #[test]
    fn test_error_aggregate_before_text() {
        let cells = vec![vec![
            CellContent::Text("#DIV/0!".into()),
            CellContent::Text("x".into()),
        ]];
        assert_eq!(summarize(&cells).aggregate, Aggregate::Errors(1));
    }

    #[test]
    fn test_text_aggregate() {
        let cells = vec![vec![CellContent::Text("x".into()), CellContent::Empty]];
        assert_eq!(summarize(&cells).aggregate, Aggregate::Text);
    }

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let a = vec![vec![num(1.0), CellContent::ArrayFormula("=X".into())]];
        let b = vec![vec![num(1.0), CellContent::ArrayFormula("=Y".into())]];
        let c = vec![vec![num(2.0), CellContent::ArrayFormula("=X".into())]];

        // Array-formula cells hash as a fixed sentinel: differing array text
        // does not change the fingerprint, a differing value does.
        assert_eq!(summarize(&a).digest, summarize(&b).digest);
        assert_ne!(summarize(&a).digest, summarize(&c).digest);
        assert_eq!(summarize(&a).digest.len(), DIGEST_DISPLAY_LEN);
    }

    #[test]
    fn test_display_shape() {
        let cells = vec![vec![num(1234.5), num(0.0)]];
        let text = summarize(&cells).to_string();
        assert!(text.starts_with("[1R x 2C] [Sum: 1,234.50] [Hash: "));
        assert!(text.ends_with("...]"));
    }
}
