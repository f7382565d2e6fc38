//! Test doubles for tickerflow pipelines.
//!
//! This module provides:
//! - Scripted stages (always-ok, always-fail, flaky) that count their calls
//! - Static and echoing capabilities
//! - A pacer that records waits instead of sleeping

mod mocks;
mod pacer;

pub use mocks::{EchoInference, FailingData, ScriptedStage, StaticData, StaticInference};
pub use pacer::RecordingPacer;
