pub mod cli;
pub mod config;
pub mod engine;
pub mod error;

pub use error::{Result, RunnerError};
