pub mod agent;
pub mod classifier;
pub mod config;
pub mod error;
pub mod normalizer;
pub mod patch;
pub mod pipeline;
pub mod policy;
pub mod runner;
pub mod sandbox;
pub mod types;

pub use error::{JudgeError, JudgeResult};
pub use pipeline::Pipeline;
pub use types::*;
