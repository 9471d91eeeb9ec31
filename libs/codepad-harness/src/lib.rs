pub mod config;
pub mod docker;
pub mod environment;
pub mod error;
pub mod harness;
pub mod judge;
pub mod local;
pub mod provisioner;
pub mod reducer;
pub mod script;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use config::{Backend, HarnessConfig};
pub use environment::{create_environment, Environment, EnvironmentHandle, ProcessHandle};
pub use error::{HarnessError, HarnessResult};
pub use harness::{to_execution_result, Harness};
pub use judge::{evaluate_fixture, Judge, JudgeState};
pub use tokio_util::sync::CancellationToken;
