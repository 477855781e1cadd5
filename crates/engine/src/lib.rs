pub mod order;
pub mod resolver;
pub mod summary;
pub mod trace;

pub use resolver::{CellTrace, GraphStore};
pub use trace::run_trace;
