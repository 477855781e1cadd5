//! Workbook views and the per-run access cache.
//!
//! A workbook can be opened under three views:
//!
//! - `Formula`: stored content, i.e. formula text for formula cells (with the
//!   leading `=` normalized on), literals otherwise, array formulas flagged.
//! - `Value`: last-computed/cached results only.
//! - `Resolved`: like `Formula`, but cross-file `[N]` placeholders in formula
//!   text substituted with their fully-qualified display form.
//!
//! Handles are fully materialized at load: the underlying file is read once
//! and closed before `load` returns, so a handle never holds an OS resource.
//! `WorkbookCache` memoizes handles per `(path, view)` for the duration of one
//! trace run; each run owns its own cache and releases it at the end.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};

use gridvine_core::address;
use gridvine_core::identity::normalize_path;
use gridvine_core::refs;
use gridvine_core::Scalar;

use crate::xlsx_meta;

/// Which rendering of the workbook a handle exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkbookView {
    Formula,
    Value,
    Resolved,
}

/// Stored content of one cell under some view.
#[derive(Debug, Clone, PartialEq)]
pub enum CellContent {
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    /// Error code text, e.g. `#Div0`.
    Error(String),
    /// Formula text including the leading `=`.
    Formula(String),
    /// Array-formula text including the leading `=`.
    ArrayFormula(String),
}

impl CellContent {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellContent::Empty)
    }

    /// Cached value as a scalar; `None` for empty cells and formula text.
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            CellContent::Number(n) => Some(Scalar::Number(*n)),
            CellContent::Text(s) => Some(Scalar::Text(s.clone())),
            CellContent::Bool(b) => Some(Scalar::Bool(*b)),
            CellContent::Error(e) => Some(Scalar::Error(e.clone())),
            CellContent::Empty | CellContent::Formula(_) | CellContent::ArrayFormula(_) => None,
        }
    }
}

/// Workbook (or sheet) could not be opened.
#[derive(Debug, Clone)]
pub struct LoadError {
    pub path: PathBuf,
    pub message: String,
}

impl LoadError {
    fn new(path: &Path, message: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "could not load {}: {}", self.path.display(), self.message)
    }
}

impl std::error::Error for LoadError {}

#[derive(Debug)]
struct SheetData {
    name: String,
    cells: HashMap<(usize, usize), CellContent>,
}

/// One workbook materialized under one view.
#[derive(Debug)]
pub struct WorkbookHandle {
    path: PathBuf,
    view: WorkbookView,
    sheet_names: Vec<String>,
    /// Keyed by lowercase sheet name.
    sheets: HashMap<String, SheetData>,
    external_links: Vec<String>,
}

impl WorkbookHandle {
    pub fn load(path: &Path, view: WorkbookView) -> Result<Self, LoadError> {
        let mut workbook =
            open_workbook_auto(path).map_err(|e| LoadError::new(path, e.to_string()))?;
        let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
        if sheet_names.is_empty() {
            return Err(LoadError::new(path, "workbook has no sheets"));
        }

        let external_links = xlsx_meta::external_link_table(path);
        let array_cells = match view {
            WorkbookView::Value => HashMap::new(),
            _ => xlsx_meta::array_formula_cells(path),
        };

        let mut sheets = HashMap::new();
        for name in &sheet_names {
            let mut cells: HashMap<(usize, usize), CellContent> = HashMap::new();

            if let Ok(range) = workbook.worksheet_range(name) {
                let (start_row, start_col) = range.start().unwrap_or((0, 0));
                for (row_idx, row) in range.rows().enumerate() {
                    for (col_idx, data) in row.iter().enumerate() {
                        let content = content_from_data(data);
                        if !content.is_empty() {
                            cells.insert(
                                (
                                    start_row as usize + row_idx,
                                    start_col as usize + col_idx,
                                ),
                                content,
                            );
                        }
                    }
                }
            }

            // Formula and Resolved views overlay stored formula text on top of
            // the cached values.
            if view != WorkbookView::Value {
                if let Ok(formula_range) = workbook.worksheet_formula(name) {
                    let (start_row, start_col) = formula_range.start().unwrap_or((0, 0));
                    for (row_idx, row) in formula_range.rows().enumerate() {
                        for (col_idx, formula) in row.iter().enumerate() {
                            if formula.is_empty() {
                                continue;
                            }
                            let text = if formula.starts_with('=') {
                                formula.clone()
                            } else {
                                format!("={formula}")
                            };
                            cells.insert(
                                (
                                    start_row as usize + row_idx,
                                    start_col as usize + col_idx,
                                ),
                                CellContent::Formula(text),
                            );
                        }
                    }
                }

                if let Some(flagged) = array_cells.get(&name.to_lowercase()) {
                    for addr in flagged {
                        if let Some(pos) = address::parse_address(addr) {
                            if let Some(CellContent::Formula(text)) = cells.remove(&pos) {
                                cells.insert(pos, CellContent::ArrayFormula(text));
                            }
                        }
                    }
                }
            }

            if view == WorkbookView::Resolved && !external_links.is_empty() {
                let working_dir = path.parent().unwrap_or_else(|| Path::new("."));
                for content in cells.values_mut() {
                    let substituted = match content {
                        CellContent::Formula(text) => Some((
                            refs::substitute_placeholders(text, &external_links, working_dir),
                            false,
                        )),
                        CellContent::ArrayFormula(text) => Some((
                            refs::substitute_placeholders(text, &external_links, working_dir),
                            true,
                        )),
                        _ => None,
                    };
                    if let Some((text, array)) = substituted {
                        *content = if array {
                            CellContent::ArrayFormula(text)
                        } else {
                            CellContent::Formula(text)
                        };
                    }
                }
            }

            sheets.insert(name.to_lowercase(), SheetData {
                name: name.clone(),
                cells,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            view,
            sheet_names,
            sheets,
            external_links,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn view(&self) -> WorkbookView {
        self.view
    }

    pub fn sheet_names(&self) -> &[String] {
        &self.sheet_names
    }

    /// Actual sheet name for a case-insensitive lookup.
    pub fn resolve_sheet_name(&self, sheet: &str) -> Option<&str> {
        self.sheets
            .get(&sheet.to_lowercase())
            .map(|s| s.name.as_str())
    }

    /// Content of one cell, or `None` when the sheet or address is unknown.
    /// Present sheets with an absent cell return `Empty`.
    pub fn cell(&self, sheet: &str, addr: &str) -> Option<CellContent> {
        let data = self.sheets.get(&sheet.to_lowercase())?;
        let pos = address::parse_address(addr)?;
        Some(
            data.cells
                .get(&pos)
                .cloned()
                .unwrap_or(CellContent::Empty),
        )
    }

    /// Rectangular read of a range address, row-major, empty cells filled in.
    pub fn range_cells(&self, sheet: &str, addr: &str) -> Option<Vec<Vec<CellContent>>> {
        let data = self.sheets.get(&sheet.to_lowercase())?;
        let ((r1, c1), (r2, c2)) = address::parse_range(addr)?;
        let mut rows = Vec::with_capacity(r2 - r1 + 1);
        for row in r1..=r2 {
            let mut cols = Vec::with_capacity(c2 - c1 + 1);
            for col in c1..=c2 {
                cols.push(
                    data.cells
                        .get(&(row, col))
                        .cloned()
                        .unwrap_or(CellContent::Empty),
                );
            }
            rows.push(cols);
        }
        Some(rows)
    }

    /// All stored cells of a sheet, in no particular order.
    pub fn cells<'a>(
        &'a self,
        sheet: &str,
    ) -> Option<impl Iterator<Item = ((usize, usize), &'a CellContent)> + 'a> {
        self.sheets
            .get(&sheet.to_lowercase())
            .map(|data| data.cells.iter().map(|(pos, content)| (*pos, content)))
    }

    /// Ordered external-link table (linked workbook file names), empty when
    /// the workbook links to no other files.
    pub fn external_links(&self) -> &[String] {
        &self.external_links
    }
}

fn content_from_data(data: &Data) -> CellContent {
    match data {
        Data::Empty => CellContent::Empty,
        Data::Int(n) => CellContent::Number(*n as f64),
        Data::Float(n) => CellContent::Number(*n),
        Data::String(s) => CellContent::Text(s.clone()),
        Data::Bool(b) => CellContent::Bool(*b),
        Data::Error(e) => CellContent::Error(format!("#{:?}", e)),
        Data::DateTime(dt) => CellContent::Number(dt.as_f64()),
        Data::DateTimeIso(s) => CellContent::Text(s.clone()),
        Data::DurationIso(s) => CellContent::Text(s.clone()),
    }
}

/// Per-run memoized workbook access.
///
/// Keyed by `(lexically normalized path, view)`. Only successful loads are
/// cached; a failing file is retried on the next request (it may appear
/// mid-run). Never share a cache between two concurrent runs: each run owns
/// its own instance.
#[derive(Default)]
pub struct WorkbookCache {
    entries: HashMap<(PathBuf, WorkbookView), WorkbookHandle>,
}

impl WorkbookCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memoized load. Repeated requests for the same `(path, view)` return
    /// the same handle without touching the file again.
    pub fn get(&mut self, path: &Path, view: WorkbookView) -> Result<&WorkbookHandle, LoadError> {
        let key = (normalize_path(path), view);
        if !self.entries.contains_key(&key) {
            let handle = WorkbookHandle::load(path, view)?;
            self.entries.insert(key.clone(), handle);
        }
        Ok(self.entries.get(&key).expect("just inserted"))
    }

    /// Drop every cached handle. Called once at the end of the owning run;
    /// dropping the cache itself has the same effect.
    pub fn release_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
