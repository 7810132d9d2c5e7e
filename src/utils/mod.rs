//!
//! Utility module for applications embedding the SDK.
//!
//! Re-exports the tracing setup helper.
/// Tracing subscriber setup
pub mod logging;

pub use logging::init_tracing;
