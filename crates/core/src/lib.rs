pub mod address;
pub mod identity;
pub mod path;
pub mod refs;
pub mod registry;
pub mod report;

pub use identity::CellIdentity;
pub use path::TraversalPath;
pub use registry::VisitedRegistry;
pub use report::{DisplayMode, Scalar, TraceReport};
