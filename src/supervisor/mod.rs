pub mod classify;
pub mod process;
pub mod profile;

pub use classify::{Markers, ProcessResult, classify_log};
pub use process::{Supervisor, ToolError};
pub use profile::ToolProfile;
