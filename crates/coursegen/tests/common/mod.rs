//! Shared test utilities for coursegen integration tests.
//!
//! - `TestHarness`: temp-dir database, orchestrator, worker pool and driver
//! - `ScriptedGenerator`: deterministic generation capability

pub mod generator;
pub mod harness;

pub use generator::ScriptedGenerator;
pub use harness::TestHarness;
