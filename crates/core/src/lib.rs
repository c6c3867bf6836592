pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod ids;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use command::{BundleCommand, Command, InvocationMode};
pub use config::EngineConfig;
pub use error::CoreError;
pub use ids::*;
