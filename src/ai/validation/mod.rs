//! AI Response Validation
//!
//! Turns raw backend text into a structured value or a definite failure reason.
//!
//! ## Design Philosophy
//! - Never raise: every input yields a `ParseOutcome`
//! - Repair syntax, never content

mod json_repair;

pub use json_repair::{
    JsonRepairer, ParseFailure, ParseOutcome, ParsedValue, RepairTier, parse_model_output,
    strip_code_fences,
};

pub(crate) use json_repair::preview;
