//! Command implementations for the CLI
//!
//! - start: Start the API server
//! - test: Test configuration validity

pub mod start;
pub mod test;
