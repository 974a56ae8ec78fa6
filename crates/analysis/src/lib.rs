//! Model-backed analysis stages.
//!
//! The Phase-2 analyst validates and enriches triage output; the
//! Phase-3 strategist adds executive context for the slice of traffic
//! that warrants it. Both parse model output through a progressive
//! normalization ladder and retry generation at lower temperature
//! before giving up.

pub mod analyst;
pub mod error;
pub mod parse;
pub mod prompts;
pub mod strategist;

pub use analyst::{Analyst, AnalystConfig, LlmAnalyst};
pub use error::AnalysisError;
pub use parse::{Normalization, parse_json_lenient};
pub use strategist::{LlmStrategist, Strategist, StrategistConfig};

/// A stage result together with how hard the parser had to work for it.
#[derive(Debug, Clone)]
pub struct Analyzed<T> {
    pub result: T,
    /// Parse retries consumed: normalization fallbacks plus
    /// regenerations at lower temperature.
    pub parse_retries: u32,
}
