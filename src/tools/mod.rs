//! Diagnostic exports of a loaded model

pub mod dot;
pub mod json_dump;
pub mod statistics;

pub use dot::to_dot;
pub use json_dump::{to_json, to_json_value};
pub use statistics::GraphStatistics;
