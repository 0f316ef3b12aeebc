//! TRENDSCOUT: multi-market technical opportunity scanner
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod analysis;
pub mod providers;
pub mod ranking;
pub mod engine;
pub mod storage;
pub mod dashboard;
