//! Compose file parsing.
//!
//! Service bundles are compose files handed to the runtime as-is. The lifecycle
//! manager only reads which services a bundle defines, the profiles gating
//! them and the host ports they publish.

pub mod parser;
pub mod types;

#[cfg(test)]
mod parser_tests;

pub use parser::ComposeParser;
pub use types::*;
