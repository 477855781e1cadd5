//! Report model: display modes, line markers, scalar values, and the final
//! trace report.
//!
//! The rendered text is line-oriented; a downstream presentation layer
//! pattern-matches the marker glyphs to apply highlighting, so the glyphs are
//! part of the output contract, not decoration.

use serde::{Deserialize, Serialize};

use crate::identity::CellIdentity;

/// Marker glyphs for report lines. Fixed: consumers match on these.
pub mod markers {
    /// Node header lines (and circular-reference lines).
    pub const NODE: &str = "📍";
    /// Formula text line of a formula cell.
    pub const FORMULA: &str = "⚙️ Formula:";
    /// Cached/computed value line of a formula cell.
    pub const RESULT: &str = "📊 Result:";
    /// Range-summary line of a multi-cell target.
    pub const CHARACTERISTIC: &str = "🔷 Characteristic:";
    /// Error leaf lines.
    pub const ERROR: &str = "❌";
}

/// How node headers are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Omit file/sheet qualifiers that match the parent context.
    Simple,
    /// Always `[file]sheet!cell`.
    Detail,
    /// Always the unabbreviated file path.
    FullPath,
}

impl DisplayMode {
    /// Header string for `task` given the parent node it was reached from.
    pub fn header(self, task: &CellIdentity, parent: Option<&CellIdentity>) -> String {
        match self {
            DisplayMode::Simple => match parent {
                Some(parent) if task.same_sheet(parent) => task.cell.clone(),
                Some(parent) if task.same_file(parent) => {
                    format!("{}!{}", task.sheet, task.cell)
                }
                _ => task.qualified_label(),
            },
            DisplayMode::Detail => task.qualified_label(),
            DisplayMode::FullPath => {
                format!("{}|{}!{}", task.file.display(), task.sheet, task.cell)
            }
        }
    }
}

/// A cached cell value from the workbook's computed-value view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Number(f64),
    Text(String),
    Bool(bool),
    /// Error code text, e.g. `#DIV/0!`.
    Error(String),
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Text values render quoted so they are distinguishable from
            // numbers and addresses in the report.
            Scalar::Text(s) => write!(f, "'{s}'"),
            Scalar::Number(n) => write!(f, "{}", format_number(*n)),
            Scalar::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Scalar::Error(e) => write!(f, "{e}"),
        }
    }
}

/// Render a number without a trailing `.0` for whole values.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// The two outputs of one trace run: rendered tree text and the flattened,
/// deduplicated, first-encounter-ordered node sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceReport {
    pub text: String,
    pub nodes: Vec<CellIdentity>,
}

impl TraceReport {
    /// The tree text with a blank line after every non-empty line.
    pub fn spaced_text(&self) -> String {
        let mut spaced = Vec::new();
        for line in self.text.lines() {
            if !line.trim().is_empty() {
                spaced.push(line);
                spaced.push("");
            }
        }
        spaced.join("\n").trim_end().to_string()
    }
}
