//! E2E test harness for fsguard.
//!
//! Not every builder and assertion is used by the current scenarios.

#![allow(dead_code)]

pub mod assertions;
pub mod clock;
pub mod runner;
pub mod scenario;
pub mod steps;
pub mod workspace;

pub use assertions::Assertion;
pub use scenario::Scenario;
pub use steps::BatchAction;
