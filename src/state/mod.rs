//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `FailureReason` / `FetchFailure`: classification of failed attempts
//! - `HealthReporter`: counters and gauges read by the monitoring console

mod health;
mod outcome;

pub use health::{HealthReporter, HealthSnapshot};
pub use outcome::{FailureReason, FetchFailure};
