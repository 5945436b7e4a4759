//! Job lifecycle: claim, validate, dispatch, report.

pub mod controller;
pub mod state;

pub use controller::Controller;
pub use state::{JobTracker, PollBackoff};
