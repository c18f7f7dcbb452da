pub mod artifacts;
pub mod config;
pub mod db;
pub mod error;
pub mod generator;
pub mod gold;
pub mod pipeline;
pub mod queries;
pub mod silver;
pub mod types;
pub mod warehouse;

pub use error::{PipelineError, Result};
