//! CLI-specific functionality for the tollgate binary
//!
//! This module contains argument parsing, configuration discovery and the
//! simulated work the binary drives the engine with.

pub mod args;
pub mod config;
pub mod demo;

pub use args::{Args, ExecutionMode, RunConfig};
pub use config::ConfigDiscovery;
pub use demo::{SimulatedJob, SimulatedWork, WaitOutcome};
