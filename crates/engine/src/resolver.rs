//! Per-cell reference resolution.
//!
//! `resolve` explains one cell: classifies it (literal / formula / range),
//! extracts its dependencies through the compiled reference graph,
//! reconstructs cross-file placeholders in the display text, resolves dynamic
//! (INDIRECT) references, and fetches the cached value. It never fails: every
//! internal error becomes an error-display leaf so the rest of the trace keeps
//! going.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use gridvine_core::address;
use gridvine_core::identity::normalize_path;
use gridvine_core::refs::{self, IndirectSegment, RawRef};
use gridvine_core::report::{format_number, markers};
use gridvine_core::{CellIdentity, Scalar};
use gridvine_io::{CellContent, LoadError, ReferenceGraph, WorkbookCache, WorkbookView};

use crate::summary;

/// Resolved description of one cell, produced fresh per call.
#[derive(Debug, Clone)]
pub struct CellTrace {
    pub dependencies: Vec<CellIdentity>,
    pub is_formula: bool,
    pub display: String,
    pub value: Option<Scalar>,
}

impl CellTrace {
    fn leaf(display: String) -> Self {
        Self {
            dependencies: Vec::new(),
            is_formula: false,
            display,
            value: None,
        }
    }
}

/// Per-run memo of compiled reference graphs, one per file.
///
/// Built from the Formula view but memoized independently of the workbook
/// cache: a graph is scanned once per file and reused for every cell in it.
#[derive(Default)]
pub struct GraphStore {
    graphs: HashMap<PathBuf, ReferenceGraph>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(
        &mut self,
        cache: &mut WorkbookCache,
        path: &Path,
    ) -> Result<&ReferenceGraph, LoadError> {
        let key = normalize_path(path);
        if !self.graphs.contains_key(&key) {
            let handle = cache.get(path, WorkbookView::Formula)?;
            let graph = ReferenceGraph::build(handle);
            self.graphs.insert(key.clone(), graph);
        }
        Ok(self.graphs.get(&key).expect("just inserted"))
    }
}

enum Failure {
    Load,
    Analysis(String),
}

/// Explain one cell. All failures degrade to an error-display leaf.
pub fn resolve(
    task: &CellIdentity,
    working_dir: &Path,
    cache: &mut WorkbookCache,
    graphs: &mut GraphStore,
) -> CellTrace {
    match resolve_inner(task, working_dir, cache, graphs) {
        Ok(trace) => trace,
        Err(Failure::Load) => CellTrace::leaf(format!(
            "{} Could not load file: {}",
            markers::ERROR,
            task.file.display()
        )),
        Err(Failure::Analysis(message)) => CellTrace::leaf(format!(
            "{} Error during analysis: {}",
            markers::ERROR,
            message
        )),
    }
}

fn resolve_inner(
    task: &CellIdentity,
    working_dir: &Path,
    cache: &mut WorkbookCache,
    graphs: &mut GraphStore,
) -> Result<CellTrace, Failure> {
    // Everything needed from the Formula view is extracted up front; later
    // steps hit the cache again under other views.
    let (sheet, content, links) = {
        let handle = cache
            .get(&task.file, WorkbookView::Formula)
            .map_err(|_| Failure::Load)?;
        let sheet = handle
            .resolve_sheet_name(&task.sheet)
            .ok_or_else(|| {
                Failure::Analysis(format!("Worksheet '{}' does not exist.", task.sheet))
            })?
            .to_string();

        if address::is_range(&task.cell) {
            let rect = handle.range_cells(&sheet, &task.cell).ok_or_else(|| {
                Failure::Analysis(format!("Invalid range address '{}'.", task.cell))
            })?;
            return Ok(CellTrace::leaf(summary::summarize(&rect).to_string()));
        }

        let content = handle.cell(&sheet, &task.cell).ok_or_else(|| {
            Failure::Analysis(format!("Invalid cell address '{}'.", task.cell))
        })?;
        (sheet, content, handle.external_links().to_vec())
    };

    let raw_formula = match &content {
        CellContent::Formula(text) | CellContent::ArrayFormula(text) => Some(text.clone()),
        _ => None,
    };
    let is_formula = raw_formula.is_some();

    let mut display = match &content {
        CellContent::Formula(text) | CellContent::ArrayFormula(text) => text.clone(),
        CellContent::Text(s) => format!("'{s}'"),
        CellContent::Number(n) => format_number(*n),
        CellContent::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        CellContent::Error(e) => e.clone(),
        CellContent::Empty => "(empty)".to_string(),
    };

    let mut dependencies = Vec::new();
    if is_formula {
        let file_name = task.file_name();
        let inputs: Vec<String> = {
            let graph = graphs
                .get(cache, &task.file)
                .map_err(|e| Failure::Analysis(e.to_string()))?;
            graph
                .lookup(&file_name, &sheet, &task.cell)
                .map(|node| node.inputs.clone())
                .unwrap_or_default()
        };
        for input in &inputs {
            // Unparseable inputs are skipped; the rest of the cell's
            // dependencies are unaffected.
            if let Ok(id) = refs::resolve_reference_str(input, &task.file, working_dir) {
                dependencies.push(id);
            }
        }
    }

    if let Some(raw) = &raw_formula {
        // Reconstruct cross-file placeholders for display.
        if !links.is_empty() {
            display = refs::substitute_placeholders(raw, &links, working_dir);
        }

        // Prefer the externally-resolved rendering when available.
        if let Ok(resolved) = cache.get(&task.file, WorkbookView::Resolved) {
            match resolved.cell(&sheet, &task.cell) {
                Some(CellContent::Formula(text)) | Some(CellContent::ArrayFormula(text)) => {
                    display = text;
                }
                _ => {}
            }
        }

        // Dynamic reference: a formula that computes a reference from a
        // string expression. The parsed target becomes the first-listed
        // dependency; failures annotate the display and are not fatal.
        if raw.to_uppercase().contains("INDIRECT") {
            match resolve_indirect(raw, &sheet, task, working_dir, cache) {
                Ok(Some(identity)) => dependencies.insert(0, identity),
                Ok(None) => {}
                Err(warning) => {
                    display.push_str(&format!(" [Tracer Warning: {warning}]"));
                }
            }
        }
    }

    // Cached value, for display only.
    let value = match cache.get(&task.file, WorkbookView::Value) {
        Ok(handle) => handle
            .cell(&sheet, &task.cell)
            .and_then(|c| c.as_scalar()),
        Err(_) => None,
    };

    Ok(CellTrace {
        dependencies,
        is_formula,
        display,
        value,
    })
}

/// Resolve the first INDIRECT call in `raw` to an external cell identity.
///
/// Only the exactly-3-literals / 2-evaluated-segments argument shape is
/// supported; other shapes resolve to `Ok(None)`. Evaluation and parse
/// failures return the inline warning text.
fn resolve_indirect(
    raw: &str,
    sheet: &str,
    task: &CellIdentity,
    working_dir: &Path,
    cache: &mut WorkbookCache,
) -> Result<Option<CellIdentity>, String> {
    let Some(argument) = refs::indirect_argument(raw) else {
        return Ok(None);
    };

    let segments = refs::split_indirect(&argument);
    let literal_count = segments
        .iter()
        .filter(|s| matches!(s, IndirectSegment::Literal(_)))
        .count();
    let expr_count = segments.len() - literal_count;
    if literal_count != 3 || expr_count != 2 {
        return Ok(None);
    }

    let values = cache
        .get(&task.file, WorkbookView::Value)
        .map_err(|e| format!("Could not resolve INDIRECT -> {e}"))?;

    let mut target = String::new();
    for segment in &segments {
        match segment {
            IndirectSegment::Literal(text) => target.push_str(text),
            IndirectSegment::Expr(expr) => {
                let evaluated = values
                    .cell(sheet, expr.trim())
                    .and_then(|c| c.as_scalar())
                    .map(|s| plain_text(&s))
                    .ok_or_else(|| {
                        format!("Could not resolve INDIRECT -> cannot evaluate '{expr}'")
                    })?;
                target.push_str(&evaluated);
            }
        }
    }

    match refs::parse_reference(&target) {
        Ok(raw) => match &raw {
            RawRef::External { dir, .. } if !dir.is_empty() => Ok(Some(
                refs::resolve_reference(&raw, &task.file, working_dir),
            )),
            _ => Err(format!("Could not parse INDIRECT result '{target}'")),
        },
        Err(_) => Err(format!("Could not parse INDIRECT result '{target}'")),
    }
}

/// Scalar rendered without quoting, for splicing into a reference string.
fn plain_text(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Text(s) => s.clone(),
        Scalar::Number(n) => format_number(*n),
        Scalar::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Scalar::Error(e) => e.clone(),
    }
}
