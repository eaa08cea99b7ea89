//! External process execution

pub mod executor;
pub mod pool;
pub mod retry;

pub use executor::{
    CommandExecutionResult, CommandOutcome, CommandRequest, ExecutionStatus, ExecutionStrategy,
    ProcessExecutor,
};
pub use pool::{PoolBounds, WorkerPool};
pub use retry::RetryPolicy;
