//! Post-compilation reports.
pub mod telemetry;

pub use telemetry::ScheduleReport;
