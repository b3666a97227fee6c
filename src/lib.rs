//! WinGo predictor: multi-stream colour forecasting service.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry points.

pub mod config;
pub mod types;
pub mod source;
pub mod features;
pub mod model;
pub mod engine;
pub mod storage;
pub mod notify;
pub mod dashboard;
