mod recorder;
mod registry;

pub use recorder::CallLog;
pub use registry::{category, handler, TestRegistry, START_SECS};
