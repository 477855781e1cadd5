// End-to-end trace tests over real .xlsx fixtures.
// Run with: cargo test -p gridvine-engine --test trace

use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Formula, Workbook};

use gridvine_core::{CellIdentity, DisplayMode};
use gridvine_engine::run_trace;

fn fixture(dir: &Path, name: &str, build: impl FnOnce(&mut Workbook)) -> PathBuf {
    let path = dir.join(name);
    let mut workbook = Workbook::new();
    build(&mut workbook);
    workbook.save(&path).unwrap();
    path
}

/// C1 = A1 + B1, A1 = 5 literal, B1 = A1 * 2.
fn write_basic(dir: &Path) -> PathBuf {
    fixture(dir, "book.xlsx", |wb| {
        let sheet = wb.add_worksheet();
        sheet.set_name("Sheet1").unwrap();
        sheet.write_number(0, 0, 5).unwrap(); // A1
        sheet
            .write_formula(0, 1, Formula::new("=A1*2").set_result("10"))
            .unwrap(); // B1
        sheet
            .write_formula(0, 2, Formula::new("=A1+B1").set_result("15"))
            .unwrap(); // C1
    })
}

#[test]
fn end_to_end_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_basic(dir.path());

    let task = CellIdentity::new(&path, "Sheet1", "C1");
    let report = run_trace(&task, DisplayMode::Simple);

    // Root header is fully qualified; formula and result lines follow.
    assert!(report.text.contains("📍 [book.xlsx]Sheet1!C1"));
    assert!(report.text.contains("⚙️ Formula: =A1+B1"));

    // A1 occurs before B1 in "=A1+B1", so A1 expands first.
    let a1_pos = report.text.find("📍 A1: 5").expect("A1 literal line");
    let b1_pos = report.text.find("📍 B1").expect("B1 header line");
    assert!(a1_pos < b1_pos);

    // B1 expands A1 again (a diamond route, not a cycle): the literal shows
    // up once under C1 and once under B1.
    assert_eq!(report.text.matches("📍 A1: 5").count(), 2);
    assert!(!report.text.contains("Circular reference"));

    // Flattened registry deduplicates: C1, A1, B1 in first-encounter order.
    let cells: Vec<&str> = report.nodes.iter().map(|n| n.cell.as_str()).collect();
    assert_eq!(cells, ["C1", "A1", "B1"]);
}

#[test]
fn cycle_terminates_with_marker() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(dir.path(), "cycle.xlsx", |wb| {
        let sheet = wb.add_worksheet();
        sheet.set_name("Sheet1").unwrap();
        sheet.write_formula(0, 0, Formula::new("=B1")).unwrap(); // A1
        sheet.write_formula(0, 1, Formula::new("=A1")).unwrap(); // B1
    });

    let task = CellIdentity::new(&path, "Sheet1", "A1");
    let report = run_trace(&task, DisplayMode::Simple);

    assert!(report
        .text
        .contains("📍 Circular reference to [cycle.xlsx]Sheet1!A1 detected, stopping expansion."));
    // A1 and B1 each expand exactly once.
    assert_eq!(report.nodes.len(), 2);
}

#[test]
fn diamond_expands_per_route_but_registers_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(dir.path(), "diamond.xlsx", |wb| {
        let sheet = wb.add_worksheet();
        sheet.set_name("Sheet1").unwrap();
        sheet.write_number(0, 0, 7).unwrap(); // A1
        sheet.write_formula(0, 1, Formula::new("=A1")).unwrap(); // B1
        sheet.write_formula(0, 2, Formula::new("=A1")).unwrap(); // C1
        sheet
            .write_formula(0, 3, Formula::new("=B1+C1"))
            .unwrap(); // D1
    });

    let task = CellIdentity::new(&path, "Sheet1", "D1");
    let report = run_trace(&task, DisplayMode::Simple);

    assert_eq!(report.text.matches("📍 A1: 7").count(), 2);
    assert_eq!(report.nodes.len(), 4);
}

#[test]
fn range_target_is_a_leaf() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(dir.path(), "range.xlsx", |wb| {
        let sheet = wb.add_worksheet();
        sheet.set_name("Sheet1").unwrap();
        sheet.write_number(0, 0, 1).unwrap(); // A1
        sheet.write_number(1, 0, 2).unwrap(); // A2
        sheet
            .write_formula(0, 2, Formula::new("=SUM(A1:B2)"))
            .unwrap(); // C1
    });

    let task = CellIdentity::new(&path, "Sheet1", "C1");
    let report = run_trace(&task, DisplayMode::Simple);

    // The SUM argument resolves to one range dependency, rendered as a
    // characteristic leaf, never expanded cell by cell.
    assert!(report.text.contains("🔷 Characteristic: [2R x 2C] [Sum: 3] [Hash: "));
    let cells: Vec<&str> = report.nodes.iter().map(|n| n.cell.as_str()).collect();
    assert_eq!(cells, ["C1", "A1:B2"]);
}

#[test]
fn missing_file_is_a_single_error_leaf() {
    let task = CellIdentity::new("/nonexistent/missing.xlsx", "Sheet1", "A1");
    let report = run_trace(&task, DisplayMode::Simple);

    assert_eq!(report.text.lines().count(), 1);
    assert!(report.text.contains("❌ Could not load file: /nonexistent/missing.xlsx"));
    assert_eq!(report.nodes.len(), 1);
}

#[test]
fn missing_sheet_is_a_local_error_leaf() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_basic(dir.path());

    let task = CellIdentity::new(&path, "NoSuchSheet", "A1");
    let report = run_trace(&task, DisplayMode::Simple);

    assert!(report
        .text
        .contains("❌ Error during analysis: Worksheet 'NoSuchSheet' does not exist."));
    assert_eq!(report.nodes.len(), 1);
}

#[test]
fn cross_file_reference_expands_into_other_workbook() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path(), "ext.xlsx", |wb| {
        let sheet = wb.add_worksheet();
        sheet.set_name("Data").unwrap();
        sheet.write_number(1, 1, 42).unwrap(); // B2
    });
    let dir_display = dir.path().display().to_string();
    let formula = format!("='{dir_display}/[ext.xlsx]Data'!B2*2");
    let path = fixture(dir.path(), "book.xlsx", |wb| {
        let sheet = wb.add_worksheet();
        sheet.set_name("Sheet1").unwrap();
        sheet
            .write_formula(0, 0, Formula::new(formula.as_str()))
            .unwrap(); // A1
    });

    let task = CellIdentity::new(&path, "Sheet1", "A1");
    let report = run_trace(&task, DisplayMode::Simple);

    // The external cell resolves against the working directory and renders
    // with its file qualifier.
    assert!(report.text.contains("📍 [ext.xlsx]Data!B2: 42"));
    assert_eq!(report.nodes.len(), 2);
    assert_eq!(report.nodes[1].file, dir.path().join("ext.xlsx"));
}

#[test]
fn sheet_names_match_case_insensitively() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_basic(dir.path());

    let task = CellIdentity::new(&path, "sheet1", "C1");
    let report = run_trace(&task, DisplayMode::Simple);

    assert!(report.text.contains("⚙️ Formula: =A1+B1"));
    assert_eq!(report.nodes.len(), 3);
}

#[test]
fn display_modes_change_headers_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_basic(dir.path());
    let task = CellIdentity::new(&path, "Sheet1", "C1");

    let detail = run_trace(&task, DisplayMode::Detail);
    // Every node is fully qualified in detail mode.
    assert_eq!(detail.text.matches("[book.xlsx]Sheet1!").count(), 4);

    let full = run_trace(&task, DisplayMode::FullPath);
    assert!(full
        .text
        .contains(&format!("{}|Sheet1!C1", path.display())));

    // Mode does not affect the flattened registry.
    let simple = run_trace(&task, DisplayMode::Simple);
    assert_eq!(simple.nodes, detail.nodes);
    assert_eq!(simple.nodes, full.nodes);
}

#[test]
fn back_to_back_runs_are_isolated_and_identical() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_basic(dir.path());
    let task = CellIdentity::new(&path, "Sheet1", "C1");

    let first = run_trace(&task, DisplayMode::Simple);
    let second = run_trace(&task, DisplayMode::Simple);

    assert_eq!(first.text, second.text);
    assert_eq!(first.nodes, second.nodes);
}

#[test]
fn indirect_dynamic_reference_resolves() {
    let dir = tempfile::tempdir().unwrap();
    fixture(dir.path(), "ext.xlsx", |wb| {
        let sheet = wb.add_worksheet();
        sheet.set_name("Data").unwrap();
        sheet.write_number(1, 1, 42).unwrap(); // B2
    });
    let dir_display = dir.path().display().to_string();
    // Three literals and two evaluated cells assemble
    // '<dir>/[ext.xlsx]Data'!B2 at evaluation time.
    let formula =
        format!("=INDIRECT(\"'{dir_display}/[\"&\"ext.xlsx]\"&A1&\"'!\"&B1)");
    let path = fixture(dir.path(), "book.xlsx", |wb| {
        let sheet = wb.add_worksheet();
        sheet.set_name("Sheet1").unwrap();
        sheet.write_string(0, 0, "Data").unwrap(); // A1
        sheet.write_string(0, 1, "B2").unwrap(); // B1
        sheet
            .write_formula(0, 2, Formula::new(formula.as_str()))
            .unwrap(); // C1
    });

    let task = CellIdentity::new(&path, "Sheet1", "C1");
    let report = run_trace(&task, DisplayMode::Simple);

    // The computed target joins the trace as a dependency of C1.
    assert!(report.text.contains("📍 [ext.xlsx]Data!B2: 42"));
    assert!(!report.text.contains("Tracer Warning"));
    assert!(report
        .nodes
        .iter()
        .any(|n| n.sheet == "Data" && n.cell == "B2"));
}

#[test]
fn indirect_failure_warns_inline_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    // Three literals, two evaluated cells, but the referenced cells are
    // empty, so evaluation fails.
    let path = fixture(dir.path(), "warn.xlsx", |wb| {
        let sheet = wb.add_worksheet();
        sheet.set_name("Sheet1").unwrap();
        sheet.write_number(0, 0, 1).unwrap(); // A1
        sheet
            .write_formula(0, 2, Formula::new("=A1+INDIRECT(\"x\"&\"y\"&A9&\"z\"&B9)"))
            .unwrap(); // C1
    });

    let task = CellIdentity::new(&path, "Sheet1", "C1");
    let report = run_trace(&task, DisplayMode::Simple);

    assert!(report.text.contains("[Tracer Warning: Could not resolve INDIRECT"));
    // The static dependency is unaffected by the dynamic failure.
    assert!(report.text.contains("📍 A1: 1"));
}
