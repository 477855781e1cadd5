//! XLSX archive metadata that calamine does not expose: the ordered
//! external-link table and array-formula cell flags.
//!
//! Reads the raw parts (`xl/workbook.xml`, relationship files, worksheet XML)
//! straight from the ZIP container. All functions degrade to an empty result
//! on malformed or non-XLSX input; a workbook without these parts simply has
//! no external links and no array formulas.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

/// Ordered list of externally linked workbook file names, in workbook
/// (`[1]`, `[2]`, …) order. Empty if the file has no external links.
pub fn external_link_table(path: &Path) -> Vec<String> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };
    let mut archive = match ZipArchive::new(file) {
        Ok(a) => a,
        Err(_) => return Vec::new(),
    };

    let workbook_xml = match read_zip_file(&mut archive, "xl/workbook.xml") {
        Some(s) => s,
        None => return Vec::new(),
    };
    let rels_xml = match read_zip_file(&mut archive, "xl/_rels/workbook.xml.rels") {
        Some(s) => s,
        None => return Vec::new(),
    };

    let rids = external_reference_rids(&workbook_xml);
    let rid_to_target = relationship_targets(&rels_xml);

    let mut links = Vec::new();
    for rid in &rids {
        let Some(target) = rid_to_target.get(rid) else {
            continue;
        };
        let link_part = resolve_part_path(target);
        let link_rels = rels_path_for(&link_part);
        let Some(link_rels_xml) = read_zip_file(&mut archive, &link_rels) else {
            continue;
        };
        // The externalLink part's own rels carry the linked file path.
        if let Some(target) = external_link_path_target(&link_rels_xml) {
            links.push(link_file_name(&target));
        }
    }
    links
}

/// Target of the `externalLinkPath`-typed relationship in an externalLink
/// part's rels, if present.
fn external_link_path_target(rels_xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(rels_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if e.name().as_ref() == b"Relationship" =>
            {
                let mut is_link_path = false;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"Type" => {
                            is_link_path = String::from_utf8_lossy(&attr.value)
                                .ends_with("externalLinkPath");
                        }
                        b"Target" => {
                            target = Some(String::from_utf8_lossy(&attr.value).to_string())
                        }
                        _ => {}
                    }
                }
                if is_link_path {
                    if let Some(target) = target {
                        return Some(target);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    None
}

/// Per-sheet set of cell addresses holding array formulas.
/// Keyed by lowercase sheet name; addresses uppercase.
pub fn array_formula_cells(path: &Path) -> HashMap<String, HashSet<String>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return HashMap::new(),
    };
    let mut archive = match ZipArchive::new(file) {
        Ok(a) => a,
        Err(_) => return HashMap::new(),
    };

    let workbook_xml = match read_zip_file(&mut archive, "xl/workbook.xml") {
        Some(s) => s,
        None => return HashMap::new(),
    };
    let rels_xml = match read_zip_file(&mut archive, "xl/_rels/workbook.xml.rels") {
        Some(s) => s,
        None => return HashMap::new(),
    };

    let sheets = sheet_entries(&workbook_xml);
    let rid_to_target = relationship_targets(&rels_xml);

    let mut result = HashMap::new();
    for (name, rid) in sheets {
        let Some(target) = rid_to_target.get(&rid) else {
            continue;
        };
        let Some(xml) = read_zip_file(&mut archive, &resolve_part_path(target)) else {
            continue;
        };
        let cells = array_cells_in_sheet(&xml);
        if !cells.is_empty() {
            result.insert(name.to_lowercase(), cells);
        }
    }
    result
}

/// Read a file from a ZIP archive, returning None on error.
fn read_zip_file<R: std::io::Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    path: &str,
) -> Option<String> {
    use std::io::Read;
    let mut file = archive.by_name(path).ok()?;
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    Some(content)
}

/// `externalReference` r:ids from workbook.xml, in document order.
fn external_reference_rids(workbook_xml: &str) -> Vec<String> {
    let mut rids = Vec::new();
    let mut reader = Reader::from_str(workbook_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if e.name().as_ref() == b"externalReference" =>
            {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"r:id" {
                        rids.push(String::from_utf8_lossy(&attr.value).to_string());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    rids
}

/// `(sheet name, r:id)` pairs from workbook.xml, in document order.
fn sheet_entries(workbook_xml: &str) -> Vec<(String, String)> {
    let mut sheets = Vec::new();
    let mut reader = Reader::from_str(workbook_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) if e.name().as_ref() == b"sheet" => {
                let mut name = None;
                let mut rid = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"name" => name = Some(String::from_utf8_lossy(&attr.value).to_string()),
                        b"r:id" => rid = Some(String::from_utf8_lossy(&attr.value).to_string()),
                        _ => {}
                    }
                }
                if let (Some(name), Some(rid)) = (name, rid) {
                    sheets.push((name, rid));
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    sheets
}

/// rId → Target map from a relationships XML part.
fn relationship_targets(rels_xml: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let mut reader = Reader::from_str(rels_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if e.name().as_ref() == b"Relationship" =>
            {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"Id" => id = Some(String::from_utf8_lossy(&attr.value).to_string()),
                        b"Target" => {
                            target = Some(String::from_utf8_lossy(&attr.value).to_string())
                        }
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    map.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    map
}

/// Addresses of `<f t="array">` cells in one worksheet XML.
fn array_cells_in_sheet(worksheet_xml: &str) -> HashSet<String> {
    let mut cells = HashSet::new();
    let mut reader = Reader::from_str(worksheet_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut current_cell: Option<String> = None;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"c" => {
                    current_cell = None;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"r" {
                            current_cell =
                                Some(String::from_utf8_lossy(&attr.value).to_uppercase());
                        }
                    }
                }
                b"f" => {
                    let is_array = e.attributes().flatten().any(|attr| {
                        attr.key.as_ref() == b"t" && attr.value.as_ref() == b"array"
                    });
                    if is_array {
                        if let Some(cell) = &current_cell {
                            cells.insert(cell.clone());
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    cells
}

/// Resolve a workbook-relative part target to an archive path.
fn resolve_part_path(target: &str) -> String {
    if let Some(stripped) = target.strip_prefix('/') {
        stripped.to_string()
    } else {
        format!("xl/{target}")
    }
}

/// Relationships part for a given part: `dir/_rels/name.rels`.
fn rels_path_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, name)) => format!("{dir}/_rels/{name}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// File name of an external-link Target (`file:///C:/x/Book2.xlsx`,
/// `/abs/Book2.xlsx`, or plain `Book2.xlsx`).
fn link_file_name(target: &str) -> String {
    let target = target
        .strip_prefix("file:///")
        .or_else(|| target.strip_prefix("file://"))
        .unwrap_or(target);
    let normalized = target.replace('\\', "/");
    normalized
        .rsplit('/')
        .next()
        .unwrap_or(&normalized)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKBOOK_XML: &str = r#"<?xml version="1.0"?>
<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <sheets>
    <sheet name="Sheet1" sheetId="1" r:id="rId1"/>
    <sheet name="Data" sheetId="2" r:id="rId2"/>
  </sheets>
  <externalReferences>
    <externalReference r:id="rId4"/>
    <externalReference r:id="rId5"/>
  </externalReferences>
</workbook>"#;

    const RELS_XML: &str = r#"<?xml version="1.0"?>
<Relationships>
  <Relationship Id="rId1" Type="..worksheet" Target="worksheets/sheet1.xml"/>
  <Relationship Id="rId2" Type="..worksheet" Target="worksheets/sheet2.xml"/>
  <Relationship Id="rId4" Type="..externalLink" Target="externalLinks/externalLink1.xml"/>
  <Relationship Id="rId5" Type="..externalLink" Target="externalLinks/externalLink2.xml"/>
</Relationships>"#;

    #[test]
    fn test_external_reference_rids_ordered() {
        assert_eq!(external_reference_rids(WORKBOOK_XML), ["rId4", "rId5"]);
    }

    #[test]
    fn test_sheet_entries() {
        assert_eq!(
            sheet_entries(WORKBOOK_XML),
            [
                ("Sheet1".to_string(), "rId1".to_string()),
                ("Data".to_string(), "rId2".to_string())
            ]
        );
    }

    #[test]
    fn test_relationship_targets() {
        let map = relationship_targets(RELS_XML);
        assert_eq!(
            map.get("rId4").map(String::as_str),
            Some("externalLinks/externalLink1.xml")
        );
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_array_cells_in_sheet() {
        let xml = r#"<worksheet><sheetData>
          <row r="1">
            <c r="A1"><f t="array" ref="A1:A2">SUM(B1:B2)</f><v>3</v></c>
            <c r="B1"><f>C1*2</f><v>4</v></c>
          </row>
        </sheetData></worksheet>"#;
        let cells = array_cells_in_sheet(xml);
        assert!(cells.contains("A1"));
        assert!(!cells.contains("B1"));
        assert_eq!(cells.len(), 1);
    }

    #[test]
    fn test_part_path_resolution() {
        assert_eq!(
            resolve_part_path("worksheets/sheet1.xml"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(
            resolve_part_path("/xl/worksheets/sheet1.xml"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(
            rels_path_for("xl/externalLinks/externalLink1.xml"),
            "xl/externalLinks/_rels/externalLink1.xml.rels"
        );
    }

    #[test]
    fn test_link_file_name() {
        assert_eq!(link_file_name("Book2.xlsx"), "Book2.xlsx");
        assert_eq!(link_file_name("file:///C:/w/Book2.xlsx"), "Book2.xlsx");
        assert_eq!(link_file_name("C:\\w\\Book2.xlsx"), "Book2.xlsx");
        assert_eq!(link_file_name("/abs/dir/Book2.xlsx"), "Book2.xlsx");
    }

    #[test]
    fn test_external_link_path_target() {
        let xml = r#"<Relationships>
          <Relationship Id="rId1"
            Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/externalLinkPath"
            Target="Book2.xlsx" TargetMode="External"/>
        </Relationships>"#;
        assert_eq!(external_link_path_target(xml).as_deref(), Some("Book2.xlsx"));
        assert_eq!(external_link_path_target(RELS_XML), None);
    }

    #[test]
    fn test_missing_file_degrades_to_empty() {
        assert!(external_link_table(Path::new("/nonexistent.xlsx")).is_empty());
        assert!(array_formula_cells(Path::new("/nonexistent.xlsx")).is_empty());
    }
}
