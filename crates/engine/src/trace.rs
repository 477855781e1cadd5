//! Depth-first dependency traversal and report construction.
//!
//! Two sharing disciplines, deliberately distinct: the traversal path is a
//! per-branch *value* (each recursion extends a copy, so sibling branches are
//! independent), while the visited registry is one run-wide object shared by
//! mutable reference. The path bounds recursion (cycle check); the registry
//! deduplicates the flattened report without preventing a node from being
//! shown under every distinct non-cyclic route that reaches it.

use std::path::{Path, PathBuf};

use gridvine_core::report::markers;
use gridvine_core::{CellIdentity, DisplayMode, TraceReport, TraversalPath, VisitedRegistry};
use gridvine_io::WorkbookCache;

use crate::order::order_dependencies;
use crate::resolver::{self, GraphStore};

struct TraceContext {
    cache: WorkbookCache,
    graphs: GraphStore,
    registry: VisitedRegistry,
    working_dir: PathBuf,
    mode: DisplayMode,
    out: String,
}

/// Run one complete trace from `task`.
///
/// The run owns its workbook cache, graph store, and registry (nothing is
/// shared with any other run), and every open handle is released before the
/// report is returned.
pub fn run_trace(task: &CellIdentity, mode: DisplayMode) -> TraceReport {
    let working_dir = task
        .file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let mut ctx = TraceContext {
        cache: WorkbookCache::new(),
        graphs: GraphStore::new(),
        registry: VisitedRegistry::new(),
        working_dir,
        mode,
        out: String::new(),
    };

    walk(&mut ctx, task, "", &TraversalPath::new(), None);

    ctx.cache.release_all();
    TraceReport {
        text: ctx.out,
        nodes: ctx.registry.into_nodes(),
    }
}

fn walk(
    ctx: &mut TraceContext,
    task: &CellIdentity,
    prefix: &str,
    path: &TraversalPath,
    parent: Option<&CellIdentity>,
) {
    // Sole terminal cycle state: the branch is cut here, nothing else stops.
    if path.contains(task) {
        ctx.out.push_str(&format!(
            "{prefix}{} Circular reference to {} detected, stopping expansion.\n",
            markers::NODE,
            task.qualified_label()
        ));
        return;
    }

    ctx.registry.record(task);

    let trace = resolver::resolve(task, &ctx.working_dir, &mut ctx.cache, &mut ctx.graphs);
    let header = ctx.mode.header(task, parent);

    if !trace.is_formula && trace.display.starts_with('[') {
        // Range leaf
        ctx.out
            .push_str(&format!("{prefix}{} {header}\n", markers::NODE));
        ctx.out.push_str(&format!(
            "{prefix}{} {}\n",
            markers::CHARACTERISTIC,
            trace.display
        ));
    } else if !trace.is_formula {
        match &trace.value {
            Some(value) => ctx
                .out
                .push_str(&format!("{prefix}{} {header}: {value}\n", markers::NODE)),
            None => ctx.out.push_str(&format!(
                "{prefix}{} {header}: {}\n",
                markers::NODE,
                trace.display
            )),
        }
    } else {
        ctx.out
            .push_str(&format!("{prefix}{} {header}\n", markers::NODE));
        ctx.out.push_str(&format!(
            "{prefix}{} {}\n",
            markers::FORMULA,
            trace.display
        ));
        match &trace.value {
            Some(value) => ctx
                .out
                .push_str(&format!("{prefix}{} {value}\n", markers::RESULT)),
            None => ctx.out.push_str(&format!(
                "{prefix}{} [Unable to calculate]\n",
                markers::RESULT
            )),
        }
    }

    let formula_text = if trace.is_formula {
        Some(trace.display.clone())
    } else {
        None
    };
    let ordered = order_dependencies(trace.dependencies, formula_text.as_deref());

    // Each child gets its own copy of the extended path.
    let extended = path.child(task);
    let continued = prefix.replace("├─", "│    ").replace("└─", "     ");
    let count = ordered.len();
    for (i, dep) in ordered.iter().enumerate() {
        let connector = if i + 1 == count { "└─ " } else { "├─ " };
        let child_prefix = format!("{continued}{connector}");
        walk(ctx, dep, &child_prefix, &extended, Some(task));
    }
}
