//! AT protocol definitions.
//!
//! This module contains the low-level protocol types including:
//! - Command formatting and per-command timeouts
//! - Response classification and value helpers
//! - Numeric error code tables
//! - The byte-level response parser

pub mod codes;
pub mod command;
pub mod parser;

pub use codes::ErrorCategory;
pub use command::{Command, FinalResult, Response, right_hand_side, split_values};
pub use parser::{LineParser, Parsed, ParserConfig, ParserState};
