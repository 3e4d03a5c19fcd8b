pub mod config;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod harness;
pub mod judge;

#[cfg(test)]
mod test_support;

pub use engine::LocalRunner;
pub use executor::{ExecutionMode, Grader};
pub use harness::{Harness, HarnessBuilder};
pub use judge::{JudgeError, JudgeOutcome, JudgeStatus, RemoteJudgeClient};
