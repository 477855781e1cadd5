//! Compiled reference graph for one workbook file.
//!
//! Built once per file from the Formula view: every formula cell gets a node
//! keyed by the canonical lowercase `'[file]sheet'!cell` form, whose `inputs`
//! are the raw normalized reference strings the formula reads. The graph only
//! answers "which references does this cell read"; it computes nothing.

use std::collections::HashMap;

use gridvine_core::address;
use gridvine_core::refs;

use crate::workbook::{CellContent, WorkbookHandle};

/// One formula cell's declared inputs.
#[derive(Debug, Clone, Default)]
pub struct RefNode {
    /// Raw reference strings in formula scan order, e.g. `Sheet1!A1`,
    /// `Sheet1!A1:B2`, `'[ext.xlsx]Data'!B3`.
    pub inputs: Vec<String>,
}

/// Reference key → node map for one file.
#[derive(Debug, Default)]
pub struct ReferenceGraph {
    nodes: HashMap<String, RefNode>,
}

impl ReferenceGraph {
    /// Scan every formula cell of `handle` (a Formula-view handle) into a
    /// graph.
    pub fn build(handle: &WorkbookHandle) -> Self {
        let file_name = handle
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let links = handle.external_links().to_vec();

        let mut nodes = HashMap::new();
        for sheet in handle.sheet_names() {
            let Some(cells) = handle.cells(sheet) else {
                continue;
            };
            for ((row, col), content) in cells {
                let text = match content {
                    CellContent::Formula(t) | CellContent::ArrayFormula(t) => t,
                    _ => continue,
                };
                let inputs = refs::scan_references(text, sheet, &links);
                let addr = format!("{}{}", address::col_to_letters(col), row + 1);
                let key = full_key(&file_name, sheet, &addr);
                nodes.insert(key, RefNode { inputs });
            }
        }

        Self { nodes }
    }

    /// Case-insensitive lookup by `'[file]sheet'!cell`, falling back to the
    /// same-file simplified key `'sheet'!cell`.
    pub fn lookup(&self, file_name: &str, sheet: &str, cell: &str) -> Option<&RefNode> {
        self.nodes
            .get(&full_key(file_name, sheet, cell))
            .or_else(|| self.nodes.get(&simple_key(sheet, cell)))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn full_key(file_name: &str, sheet: &str, cell: &str) -> String {
    format!(
        "'[{}]{}'!{}",
        file_name.to_lowercase(),
        sheet.to_lowercase(),
        cell.to_lowercase()
    )
}

fn simple_key(sheet: &str, cell: &str) -> String {
    format!("'{}'!{}", sheet.to_lowercase(), cell.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::WorkbookView;
    use rust_xlsxwriter::{Formula, Workbook};
    use std::path::{Path, PathBuf};

    fn write_fixture(dir: &Path) -> PathBuf {
        let path = dir.join("book.xlsx");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Sheet1").unwrap();
        sheet.write_number(0, 0, 5).unwrap(); // A1
        sheet
            .write_formula(0, 1, Formula::new("=A1*2"))
            .unwrap(); // B1
        sheet
            .write_formula(0, 2, Formula::new("=A1+B1"))
            .unwrap(); // C1
        let data = workbook.add_worksheet();
        data.set_name("Data").unwrap();
        data.write_formula(1, 1, Formula::new("=Sheet1!C1"))
            .unwrap(); // Data!B2
        workbook.save(&path).unwrap();
        path
    }

    #[test]
    fn test_build_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path());
        let handle = WorkbookHandle::load(&path, WorkbookView::Formula).unwrap();

        let graph = ReferenceGraph::build(&handle);
        assert_eq!(graph.len(), 3);

        let node = graph.lookup("book.xlsx", "Sheet1", "C1").unwrap();
        assert_eq!(node.inputs, ["Sheet1!A1", "Sheet1!B1"]);

        // Case-insensitive key match
        let node = graph.lookup("BOOK.XLSX", "SHEET1", "c1").unwrap();
        assert_eq!(node.inputs.len(), 2);

        // Cross-sheet inputs keep their qualifier
        let node = graph.lookup("book.xlsx", "Data", "B2").unwrap();
        assert_eq!(node.inputs, ["Sheet1!C1"]);
    }

    #[test]
    fn test_literal_cells_have_no_node() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path());
        let handle = WorkbookHandle::load(&path, WorkbookView::Formula).unwrap();

        let graph = ReferenceGraph::build(&handle);
        assert!(graph.lookup("book.xlsx", "Sheet1", "A1").is_none());
    }
}
