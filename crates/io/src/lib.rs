// Workbook access for dependency tracing

pub mod refgraph;
pub mod workbook;
pub mod xlsx_meta;

pub use refgraph::{RefNode, ReferenceGraph};
pub use workbook::{CellContent, LoadError, WorkbookCache, WorkbookHandle, WorkbookView};
